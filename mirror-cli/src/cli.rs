use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Caching mirror for the Flutter SDK release storage",
    long_about = "A caching reverse proxy that mirrors the Flutter SDK release storage\n\
                  onto local disk. Release archives are immutable and served from the\n\
                  cache after the first download; the releases_<os>.json manifests are\n\
                  revalidated against the origin on every request."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the mirror server
    Serve {
        /// IP address for the mirror server
        #[arg(long, default_value = "0.0.0.0")]
        ip: IpAddr,

        /// Port for the mirror server
        #[arg(short, long, default_value_t = 8050)]
        port: u16,

        /// Root path for cache storage (default: the working directory)
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Origin base URL to mirror
        #[arg(long, default_value = mirror_engine::config::DEFAULT_ORIGIN)]
        origin: String,

        /// Enable detailed debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compute or verify the SHA-256 checksum of a downloaded artifact
    Verify {
        /// File to hash
        file: PathBuf,

        /// Expected SHA-256 digest (hex); exits non-zero on mismatch
        expected: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let args = CliArgs::try_parse_from(["flutter-mirror", "serve"]).unwrap();
        let Command::Serve {
            ip, port, cache, origin, verbose,
        } = args.command
        else {
            panic!("expected serve command");
        };
        assert_eq!(ip.to_string(), "0.0.0.0");
        assert_eq!(port, 8050);
        assert!(cache.is_none());
        assert_eq!(origin, mirror_engine::config::DEFAULT_ORIGIN);
        assert!(!verbose);
    }

    #[test]
    fn test_verify_args() {
        let args =
            CliArgs::try_parse_from(["flutter-mirror", "verify", "engine.zip", "abc123"]).unwrap();
        let Command::Verify { file, expected } = args.command else {
            panic!("expected verify command");
        };
        assert_eq!(file, PathBuf::from("engine.zip"));
        assert_eq!(expected.as_deref(), Some("abc123"));
    }
}
