use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "phasescan")]
#[command(author, version, about = "Phased network reconnaissance: discovery, port scan, targeted scripts", long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Scan engine binary
    #[arg(long, global = true, default_value = "nmap")]
    pub nmap: PathBuf,

    /// Timing and parallelism preset
    #[arg(long, global = true, value_enum, default_value = "balanced")]
    pub profile: ScanProfile,

    #[command(flatten)]
    pub tuning: Tuning,

    /// Disable coloured report output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full session: discovery, port scan, service actions
    Scan {
        /// Target CIDR or IP; the local subnet is used when omitted
        target: Option<String>,

        /// Write scan-stream.ndjson, scan-results.json and scan-report.md here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip scan-report.md when writing output files
        #[arg(long)]
        no_report: bool,

        /// Print the raw event stream instead of the interpreted report
        #[arg(long)]
        stream_only: bool,
    },
    /// Host discovery only
    Discover {
        /// Target CIDR or IP; the local subnet is used when omitted
        target: Option<String>,
    },
    /// Port scan of a single host
    Ports {
        host: String,
    },
    /// Service actions against a single open port
    Actions {
        host: String,
        port: u32,

        /// Service name, if already known
        #[arg(long)]
        service: Option<String>,
    },
    /// Show the ranked actions for a service
    Select {
        #[arg(long)]
        service: String,

        #[arg(long)]
        port: u32,

        #[arg(long, default_value = "3")]
        limit: usize,

        /// Print the suggested engine command for this target
        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Interpret a recorded event stream (stdin when no file is given)
    Interpret {
        file: Option<PathBuf>,
    },
}

/// Overrides applied on top of the selected profile.
#[derive(Args, Debug, Default)]
pub struct Tuning {
    /// Number of most common ports probed per host
    #[arg(long, global = true)]
    pub top_ports: Option<u32>,

    /// Engine-side per-host timeout in seconds
    #[arg(long, global = true)]
    pub host_timeout: Option<u64>,

    /// Engine-side maximum probe round trip in milliseconds
    #[arg(long, global = true)]
    pub max_rtt_timeout: Option<u64>,

    /// Delay between probes in milliseconds
    #[arg(long, global = true)]
    pub scan_delay: Option<u64>,

    /// Probe retransmissions
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Wall-clock limit for the discovery invocation in seconds
    #[arg(long, global = true)]
    pub discovery_timeout: Option<u64>,

    /// Wall-clock limit per port-scan invocation in seconds
    #[arg(long, global = true)]
    pub port_timeout: Option<u64>,

    /// Wall-clock limit per action invocation in seconds
    #[arg(long, global = true)]
    pub action_timeout: Option<u64>,

    /// Maximum concurrent engine processes
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    /// Actions run per open port
    #[arg(long, global = true)]
    pub action_limit: Option<usize>,

    /// Seconds in-flight scans may keep running after an interrupt
    #[arg(long, global = true)]
    pub grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ScanProfile {
    Fast,
    Balanced,
    Thorough,
}

/// Session-wide engine tuning. Every phase reads its flags and timeouts
/// from here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub top_ports: u32,
    pub host_timeout: Duration,
    pub max_rtt_timeout: Duration,
    pub scan_delay: Duration,
    pub max_retries: u32,
    pub discovery_timeout: Duration,
    pub port_timeout: Duration,
    pub action_timeout: Duration,
    pub max_parallel: usize,
    pub max_per_host: usize,
    pub action_limit: usize,
    pub grace: Duration,
}

impl ScanProfile {
    pub fn name(&self) -> &'static str {
        match self {
            ScanProfile::Fast => "fast",
            ScanProfile::Balanced => "balanced",
            ScanProfile::Thorough => "thorough",
        }
    }

    pub fn settings(&self) -> EngineSettings {
        match self {
            ScanProfile::Fast => EngineSettings {
                top_ports: 100,
                host_timeout: Duration::from_secs(60),
                max_rtt_timeout: Duration::from_millis(300),
                scan_delay: Duration::ZERO,
                max_retries: 1,
                discovery_timeout: Duration::from_secs(120),
                port_timeout: Duration::from_secs(90),
                action_timeout: Duration::from_secs(120),
                max_parallel: 8,
                max_per_host: 1,
                action_limit: 3,
                grace: Duration::from_secs(3),
            },
            ScanProfile::Balanced => EngineSettings {
                top_ports: 1000,
                host_timeout: Duration::from_secs(300),
                max_rtt_timeout: Duration::from_millis(500),
                scan_delay: Duration::ZERO,
                max_retries: 2,
                discovery_timeout: Duration::from_secs(300),
                port_timeout: Duration::from_secs(360),
                action_timeout: Duration::from_secs(300),
                max_parallel: 4,
                max_per_host: 1,
                action_limit: 3,
                grace: Duration::from_secs(5),
            },
            ScanProfile::Thorough => EngineSettings {
                top_ports: 5000,
                host_timeout: Duration::from_secs(900),
                max_rtt_timeout: Duration::from_millis(1000),
                scan_delay: Duration::from_millis(10),
                max_retries: 3,
                discovery_timeout: Duration::from_secs(600),
                port_timeout: Duration::from_secs(1000),
                action_timeout: Duration::from_secs(900),
                max_parallel: 2,
                max_per_host: 1,
                action_limit: 3,
                grace: Duration::from_secs(10),
            },
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        ScanProfile::Balanced.settings()
    }
}

impl Tuning {
    pub fn apply(&self, mut settings: EngineSettings) -> EngineSettings {
        if let Some(v) = self.top_ports {
            settings.top_ports = v.max(1);
        }
        if let Some(v) = self.host_timeout {
            settings.host_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.max_rtt_timeout {
            settings.max_rtt_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.scan_delay {
            settings.scan_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.max_retries {
            settings.max_retries = v;
        }
        if let Some(v) = self.discovery_timeout {
            settings.discovery_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.port_timeout {
            settings.port_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.action_timeout {
            settings.action_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.max_parallel {
            settings.max_parallel = v.max(1);
        }
        if let Some(v) = self.action_limit {
            settings.action_limit = v;
        }
        if let Some(v) = self.grace_secs {
            settings.grace = Duration::from_secs(v);
        }
        settings
    }
}

impl Config {
    pub fn engine_settings(&self) -> EngineSettings {
        self.tuning.apply(self.profile.settings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_profile_values() {
        let config = Config::parse_from([
            "phasescan",
            "--profile",
            "fast",
            "--host-timeout",
            "42",
            "--max-parallel",
            "0",
            "scan",
            "10.0.0.0/24",
        ]);
        let settings = config.engine_settings();

        assert_eq!(settings.host_timeout, Duration::from_secs(42));
        assert_eq!(settings.top_ports, 100);
        assert_eq!(settings.max_parallel, 1);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let config = Config::parse_from(["phasescan", "ports", "10.0.0.1", "--top-ports", "20", "-vv"]);

        assert_eq!(config.verbose, 2);
        assert_eq!(config.engine_settings().top_ports, 20);
        assert!(matches!(config.command, Command::Ports { ref host } if host == "10.0.0.1"));
    }

    #[test]
    fn default_action_limit_is_three() {
        for profile in [ScanProfile::Fast, ScanProfile::Balanced, ScanProfile::Thorough] {
            assert_eq!(profile.settings().action_limit, 3);
        }
    }
}
