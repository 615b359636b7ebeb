//! Command-line argument definitions (clap) and help text.

use std::path::PathBuf;

use clap::Parser;

pub const HELP_TEXT: &str = "
Powerman cluster power control
Usage: pm [OPTIONS] [COMMAND]

Commands:
  query                         List nodes that are on (the default)
  on | off | reset              Change node power state
  temp | tempf                  List node temperatures (same as -t)
  hwreset                       Reboot the whole icebox a node sits in

Node Selection:
  -a, --all                     Act on every node in the configuration
  -w, --nodes <N1,N2,...>       Comma separated node list, or '-' to read names from stdin
                                Falls back to the file named by $W_COL
Query Options:
  -r, --reverse                 Reverse sense: list nodes that are off
  -t, --temperature             Query temperatures instead of power state
      --low <C>                 Only list nodes with a reading below this...
      --high <C>                ...or above this (both required)
Configuration:
  -c, --conf <FILE>             Cluster configuration (default: $POWERMANCONF or /etc/powerman.conf)
  -l, --libdir <DIR>            Helper program directory (default: $POWERMANDIR or /usr/lib/powerman/)
  -f, --fanout <N>              Fan-out for parallel backends (default: 256)
      --show-config             Print the effective settings as JSON and exit
Logging:
  -L, --log                     Append a log to /tmp/powerman.log
      --trace-bytes             Log raw bytes received from the boxes
      --log-level <LEVEL>       Log level (TRACE, DEBUG, INFO, WARN, ERROR); overrides $LOG_LEVEL
  -q, --quiet                   Do not print errors
  -h, --help                    Print help
  -V, --version                 Print version
";

#[derive(Parser, Debug)]
#[command(name = "pm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Powerman cluster power control", long_about = None)]
pub struct Args {
    // === Node Selection ===
    /// Act on every node in the configuration
    #[arg(short = 'a', long, help_heading = "Node Selection")]
    pub all: bool,

    /// Comma separated node list, or '-' for stdin
    #[arg(short = 'w', long = "nodes", value_delimiter = ',', help_heading = "Node Selection")]
    pub nodes: Vec<String>,

    // === Query Options ===
    /// Reverse sense: list nodes that are off
    #[arg(short = 'r', long, help_heading = "Query Options")]
    pub reverse: bool,

    /// Query temperatures instead of power state
    #[arg(short = 't', long, help_heading = "Query Options")]
    pub temperature: bool,

    /// Lower temperature bound
    #[arg(long, requires = "high", allow_negative_numbers = true, help_heading = "Query Options")]
    pub low: Option<i32>,

    /// Upper temperature bound
    #[arg(long, requires = "low", allow_negative_numbers = true, help_heading = "Query Options")]
    pub high: Option<i32>,

    // === Configuration ===
    /// Cluster configuration file
    #[arg(short = 'c', long = "conf", help_heading = "Configuration")]
    pub conf: Option<PathBuf>,

    /// Helper program directory
    #[arg(short = 'l', long = "libdir", help_heading = "Configuration")]
    pub libdir: Option<PathBuf>,

    /// Fan-out for parallel backends
    #[arg(short = 'f', long, help_heading = "Configuration")]
    pub fanout: Option<usize>,

    /// Print the effective settings as JSON and exit
    #[arg(long = "show-config", help_heading = "Configuration")]
    pub show_config: bool,

    // === Logging ===
    /// Append a log to /tmp/powerman.log
    #[arg(short = 'L', long = "log", help_heading = "Logging")]
    pub log: bool,

    /// Log raw bytes received from the boxes
    #[arg(long = "trace-bytes", help_heading = "Logging")]
    pub trace_bytes: bool,

    /// Set log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long = "log-level", help_heading = "Logging")]
    pub log_level: Option<String>,

    /// Do not print errors
    #[arg(short = 'q', long, help_heading = "Logging")]
    pub quiet: bool,

    /// query, rquery, on, off, reset, temp, tempf or hwreset
    #[arg(default_value = "query")]
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_defaults_to_query() {
        let args = Args::try_parse_from(["pm", "-a"]).unwrap();
        assert!(args.all);
        assert_eq!(args.command, "query");
    }

    #[test]
    fn node_list_is_split_on_commas() {
        let args = Args::try_parse_from(["pm", "-w", "n1,n2,n3", "off"]).unwrap();
        assert_eq!(args.nodes, vec!["n1", "n2", "n3"]);
        assert_eq!(args.command, "off");
    }

    #[test]
    fn bounds_come_in_pairs() {
        assert!(Args::try_parse_from(["pm", "-t", "--low", "10"]).is_err());
        let args = Args::try_parse_from(["pm", "-t", "--low", "-5", "--high", "70"]).unwrap();
        assert_eq!((args.low, args.high), (Some(-5), Some(70)));
    }
}
