//! Clap derive structures for the `ispapp-agent` binary.

use std::path::PathBuf;

use clap::Parser;

/// ispapp-agent -- keeps an OpenWrt device connected to the ISPApp cloud
#[derive(Debug, Parser)]
#[command(
    name = "ispapp-agent",
    version,
    about = "ISPApp device agent",
    long_about = "Maintains an authenticated session with the ISPApp control plane,\n\
        executes remote requests and persists device settings in UCI format."
)]
pub struct Cli {
    /// Directory holding UCI config files (overrides `config_dir`)
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Runtime options file
    #[arg(long, value_name = "FILE", default_value = ispapp_config::options::DEFAULT_OPTIONS_PATH)]
    pub options: PathBuf,

    /// Accept self-signed control-plane certificates
    #[arg(long, short = 'k')]
    pub insecure: bool,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::parse_from(["ispapp-agent", "-vv", "--config-dir", "/tmp/cfg"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/cfg")));
        assert!(!cli.insecure);
    }
}
