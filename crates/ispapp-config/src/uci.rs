// ── UCI text format ──
//
// Line-oriented grammar modeled after OpenWrt's Unified Configuration
// Interface:
//
//     config <type> ['<name>']
//         option <key> '<value>'
//         list <key> '<value>'
//
// Blank lines and `#` comments are skipped. Every other line must be a
// known directive in a valid position; anything else fails with its line
// number instead of being dropped.

use std::borrow::Cow;
use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

/// A structural error at a specific (1-based) line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

// ── OptionValue ─────────────────────────────────────────────────────

/// Value of one key inside a section.
///
/// `option` lines produce [`Single`](Self::Single) (last write wins);
/// `list` lines accumulate into [`List`](Self::List) in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Single(String),
    List(Vec<String>),
}

impl OptionValue {
    /// The values as a slice: one element for a single option.
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::List(values) => values,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

// ── Section ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub section_type: String,
    /// `None` for anonymous sections (`config rule` with no name).
    pub name: Option<String>,
    pub options: IndexMap<String, OptionValue>,
}

impl Section {
    pub fn new(section_type: impl Into<String>, name: Option<String>) -> Self {
        Self {
            section_type: section_type.into(),
            name,
            options: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }
}

// ── Section selectors ───────────────────────────────────────────────

/// How a caller addresses a section: by name, or by `@type[n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selector<'a> {
    Named(&'a str),
    Indexed { section_type: &'a str, index: isize },
}

impl<'a> Selector<'a> {
    /// Parse `name`, `@type[n]` or `type[n]`. Negative `n` counts from the end.
    pub(crate) fn parse(raw: &'a str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let Some(open) = raw.find('[') else {
            return Some(Self::Named(raw));
        };
        let inner = raw.get(open + 1..)?.strip_suffix(']')?;
        let index = inner.trim().parse::<isize>().ok()?;
        let section_type = raw.get(..open)?.trim_start_matches('@');
        if section_type.is_empty() {
            return None;
        }
        Some(Self::Indexed {
            section_type,
            index,
        })
    }
}

// ── Package ─────────────────────────────────────────────────────────

/// One config file: an ordered sequence of sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    sections: Vec<Section>,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Parse config text. Comments are not preserved.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut sections: Vec<Section> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let tokens = tokenize(raw).map_err(|reason| ParseError::new(line, reason))?;
            let Some((directive, args)) = tokens.split_first() else {
                continue;
            };

            match directive.as_str() {
                "package" => {}
                "config" => {
                    let section = match args {
                        [section_type] => Section::new(section_type.as_str(), None),
                        [section_type, name] => {
                            Section::new(section_type.as_str(), Some(name.clone()))
                        }
                        _ => {
                            return Err(ParseError::new(
                                line,
                                "expected `config <type> ['<name>']`",
                            ));
                        }
                    };
                    if section.section_type.is_empty() {
                        return Err(ParseError::new(line, "empty section type"));
                    }
                    sections.push(section);
                }
                "option" => {
                    let section = sections
                        .last_mut()
                        .ok_or_else(|| ParseError::new(line, "`option` before any `config`"))?;
                    let [key, value] = args else {
                        return Err(ParseError::new(line, "expected `option <key> '<value>'`"));
                    };
                    section
                        .options
                        .insert(key.clone(), OptionValue::Single(value.clone()));
                }
                "list" => {
                    let section = sections
                        .last_mut()
                        .ok_or_else(|| ParseError::new(line, "`list` before any `config`"))?;
                    let [key, value] = args else {
                        return Err(ParseError::new(line, "expected `list <key> '<value>'`"));
                    };
                    match section.options.get_mut(key) {
                        Some(OptionValue::List(values)) => values.push(value.clone()),
                        Some(OptionValue::Single(_)) => {
                            return Err(ParseError::new(
                                line,
                                format!("`{key}` is already declared as an option"),
                            ));
                        }
                        None => {
                            section
                                .options
                                .insert(key.clone(), OptionValue::List(vec![value.clone()]));
                        }
                    }
                }
                other => {
                    return Err(ParseError::new(line, format!("unknown directive `{other}`")));
                }
            }
        }

        Ok(Self { sections })
    }

    /// Resolve a section selector to its position in file order.
    pub fn position(&self, selector: &str) -> Option<usize> {
        match Selector::parse(selector)? {
            Selector::Named(name) => self
                .sections
                .iter()
                .position(|s| s.name.as_deref() == Some(name)),
            Selector::Indexed {
                section_type,
                index,
            } => {
                let matching: Vec<usize> = self
                    .sections
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.section_type == section_type)
                    .map(|(i, _)| i)
                    .collect();
                let slot = if index < 0 {
                    matching.len().checked_sub(index.unsigned_abs())?
                } else {
                    index.unsigned_abs()
                };
                matching.get(slot).copied()
            }
        }
    }

    pub fn section(&self, selector: &str) -> Option<&Section> {
        self.position(selector).and_then(|i| self.sections.get(i))
    }

    pub(crate) fn section_mut(&mut self, selector: &str) -> Option<&mut Section> {
        self.position(selector).and_then(|i| self.sections.get_mut(i))
    }

    /// Find the section, or create a named one whose type equals its name.
    /// Index selectors never create sections.
    pub(crate) fn section_or_create(&mut self, selector: &str) -> Option<&mut Section> {
        if let Some(i) = self.position(selector) {
            return self.sections.get_mut(i);
        }
        let Selector::Named(name) = Selector::parse(selector)? else {
            return None;
        };
        self.sections.push(Section::new(name, Some(name.to_owned())));
        self.sections.last_mut()
    }

    pub(crate) fn push_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub(crate) fn remove_section(&mut self, selector: &str) -> Option<Section> {
        let i = self.position(selector)?;
        Some(self.sections.remove(i))
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match &section.name {
                Some(name) => writeln!(f, "config {} {}", word(&section.section_type), quote(name))?,
                None => writeln!(f, "config {}", word(&section.section_type))?,
            }
            for (key, value) in &section.options {
                let key = word(key);
                match value {
                    OptionValue::Single(v) => writeln!(f, "\toption {key} {}", quote(v))?,
                    OptionValue::List(values) => {
                        for v in values {
                            writeln!(f, "\tlist {key} {}", quote(v))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Lexing ──────────────────────────────────────────────────────────

/// Single-quote a value, escaping embedded quotes shell-style (`'\''`).
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Identifiers stay bare; anything the lexer would split or strip is quoted.
fn word(value: &str) -> Cow<'_, str> {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if bare {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(quote(value))
    }
}

/// Split a line into words, honouring single quotes, double quotes,
/// backslash escapes and trailing `#` comments.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '#' if !in_token => break,
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".into()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => current.push(ch),
                            None => return Err("unterminated double quote".into()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".into()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err("dangling escape at end of line".into()),
                }
            }
            ch => {
                in_token = true;
                current.push(ch);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
# ispapp agent settings
config settings 'settings'
    option enabled '1'
    option login '00000000-0000-0000-0000-000000000000'
    option Domain 'prv.cloud.ispapp.co'
    option ListenerPort '443'
    option accessToken ''
    option refreshToken ''
    list pingTargets 'cloud.example.co'
    list pingTargets 'alt.example.co'

config overview 'overview'
    option enabled '1'
";

    #[test]
    fn parses_options_and_lists() {
        let pkg = Package::parse(SAMPLE).unwrap();
        assert_eq!(pkg.sections().len(), 2);

        let settings = pkg.section("settings").unwrap();
        assert_eq!(settings.section_type, "settings");
        assert_eq!(
            settings.get("Domain"),
            Some(&OptionValue::Single("prv.cloud.ispapp.co".into()))
        );
        assert_eq!(
            settings.get("accessToken"),
            Some(&OptionValue::Single(String::new()))
        );
        assert_eq!(
            settings.get("pingTargets").unwrap().as_slice(),
            ["cloud.example.co", "alt.example.co"]
        );
    }

    #[test]
    fn later_option_wins() {
        let pkg = Package::parse("config a 'a'\noption k '1'\noption k '2'\n").unwrap();
        assert_eq!(
            pkg.section("a").unwrap().get("k"),
            Some(&OptionValue::Single("2".into()))
        );
    }

    #[test]
    fn list_keeps_duplicates_in_order() {
        let pkg =
            Package::parse("config a\n list k 'x'\n list k 'y'\n list k 'x'\n").unwrap();
        assert_eq!(
            pkg.section("@a[0]").unwrap().get("k").unwrap().as_slice(),
            ["x", "y", "x"]
        );
    }

    #[test]
    fn round_trip_is_stable() {
        let text = "config rule\n\toption name 'it'\\''s'\n\tlist dest \"a b\"\nconfig rule 'named'\n\toption bare value\n";
        let first = Package::parse(text).unwrap();
        let second = Package::parse(&first.to_string()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            second.section("@rule[0]").unwrap().get("name"),
            Some(&OptionValue::Single("it's".into()))
        );
    }

    #[test]
    fn round_trip_quotes_awkward_types_and_keys() {
        let text = "config 'wifi iface' 'radio0'\n\toption 'my key' 'v'\n\toption '' 'empty'\n\tlist \"#tag\" 'a'\n\toption \"it's\" 'b'\n";
        let first = Package::parse(text).unwrap();
        let section = first.section("radio0").unwrap();
        assert_eq!(section.section_type, "wifi iface");
        assert_eq!(section.options.len(), 4);

        let rendered = first.to_string();
        assert!(rendered.contains("config 'wifi iface' 'radio0'"), "{rendered}");
        assert!(rendered.contains("option 'my key' 'v'"), "{rendered}");
        let second = Package::parse(&rendered).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            second.section("@wifi iface[0]").unwrap().get("#tag").unwrap().as_slice(),
            ["a"]
        );
    }

    #[test]
    fn plain_identifiers_stay_bare() {
        let pkg = Package::parse("config wifi-iface 'w0'
 option ssid.name 'x'
").unwrap();
        assert_eq!(pkg.to_string(), "config wifi-iface 'w0'
	option ssid.name 'x'
");
    }

    #[test]
    fn option_before_config_is_an_error() {
        let err = Package::parse("# header\noption enabled '1'\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("before any `config`"), "{err}");
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let err = Package::parse("config a 'a'\n  opton k 'v'\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = Package::parse("config a 'a\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn list_after_option_with_same_key_is_an_error() {
        assert!(Package::parse("config a\noption k 'v'\nlist k 'w'\n").is_err());
    }

    #[test]
    fn index_selector_ignores_names() {
        let pkg = Package::parse(
            "config settings 'main'\noption n '1'\nconfig other\nconfig settings\noption n '2'\n",
        )
        .unwrap();
        assert_eq!(pkg.position("@settings[0]"), Some(0));
        assert_eq!(pkg.position("settings[1]"), Some(2));
        assert_eq!(pkg.position("@settings[-1]"), Some(2));
        assert_eq!(pkg.position("@settings[2]"), None);
        assert_eq!(pkg.position("main"), Some(0));
        assert_eq!(pkg.position("@settings[-3]"), None);
    }

    #[test]
    fn malformed_selectors_resolve_to_nothing() {
        let pkg = Package::parse("config a 'a'\n").unwrap();
        assert_eq!(pkg.position(""), None);
        assert_eq!(pkg.position("@a[x]"), None);
        assert_eq!(pkg.position("@[0]"), None);
        assert_eq!(pkg.position("@a[0"), None);
    }

    #[test]
    fn trailing_comment_is_ignored() {
        let pkg = Package::parse("config a 'a' # main\n option k 'v' # note\n").unwrap();
        assert_eq!(
            pkg.section("a").unwrap().get("k"),
            Some(&OptionValue::Single("v".into()))
        );
    }
}
