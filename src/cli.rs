//! Command line interface
//!
//! Every option can also be set through the environment. Variable names
//! match the container deployment (`KAFKAPORT`, `TOPICNAME`, `VIDEOLINK`,
//! ...), so existing manifests keep working.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::capture::{parse_size, CaptureBackend, CaptureOptions, SourceLocation};
use crate::consumer::{ConsumerConfig, DEFAULT_LOOKBACK};
use crate::media::DEFAULT_JPEG_QUALITY;
use crate::producer::{OverflowPolicy, ProducerConfig};
use crate::server::config::DEFAULT_PORT;
use crate::server::ServerConfig;

/// Live camera relay over a partitioned message broker
#[derive(Debug, Parser)]
#[command(name = "frame-relay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture frames and publish them to the broker
    Produce(ProduceArgs),
    /// Consume frames from the broker and serve them as MJPEG
    Consume(ConsumeArgs),
    /// Capture and serve in one process through the in-process broker
    Relay(RelayArgs),
}

#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    /// Broker bootstrap address
    #[arg(long, env = "KAFKAPORT", default_value = "localhost:9092")]
    pub broker: String,

    /// Topic carrying frame messages
    #[arg(long, env = "TOPICNAME", default_value = "frames")]
    pub topic: String,

    /// Compression codec for produced messages
    #[arg(long, env = "COMPRESSIONTYPE", default_value = "none")]
    pub compression: String,
}

#[derive(Debug, Clone, Args)]
pub struct CaptureArgs {
    /// Video source: camera index, device path, stream URL or pattern://WxH
    #[arg(long, env = "VIDEOLINK", default_value = "0")]
    pub source: SourceLocation,

    /// Pause between captured frames (e.g. `40ms`)
    #[arg(long, env = "FRAMEINTERVAL", default_value = "100ms", value_parser = parse_duration)]
    pub frame_interval: Duration,

    /// Output frame size for ffmpeg sources
    #[arg(long, env = "CAPTURE_SIZE", default_value = "640x480", value_parser = parse_capture_size)]
    pub capture_size: (u32, u32),

    /// What to do when the broker falls behind: `block` or `drop`
    #[arg(long, env = "OVERFLOW_POLICY", default_value = "block")]
    pub overflow: OverflowPolicy,

    /// Capture through OpenCV instead of ffmpeg
    #[cfg(feature = "opencv")]
    #[arg(long)]
    pub opencv: bool,
}

impl CaptureArgs {
    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig::with_interval(self.frame_interval).overflow(self.overflow)
    }

    pub fn capture_options(&self) -> CaptureOptions {
        #[cfg(feature = "opencv")]
        let backend = if self.opencv {
            CaptureBackend::OpenCv
        } else {
            CaptureBackend::Ffmpeg
        };
        #[cfg(not(feature = "opencv"))]
        let backend = CaptureBackend::Ffmpeg;

        CaptureOptions {
            size: self.capture_size,
            backend,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ViewerArgs {
    /// HTTP listen address; `:8080` binds all interfaces
    #[arg(long, env = "DISPLAYPORT", default_value = ":8080", value_parser = parse_listen_addr)]
    pub listen: SocketAddr,

    /// Path the stream is served on
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Externally reachable URL, logged for operators
    #[arg(long, env = "NODEPORT")]
    pub public_url: Option<String>,

    /// How many records a partition may lag behind the newest one
    #[arg(long, env = "RESYNC_LOOKBACK", default_value_t = DEFAULT_LOOKBACK)]
    pub lookback: u32,

    /// JPEG quality for frames sent to viewers
    #[arg(
        long,
        env = "JPEG_QUALITY",
        default_value_t = DEFAULT_JPEG_QUALITY,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub jpeg_quality: u8,

    /// Maximum concurrent viewers (0 = unlimited)
    #[arg(long, env = "MAX_VIEWERS", default_value_t = 0)]
    pub max_viewers: usize,
}

impl ViewerArgs {
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
            .lookback(self.lookback)
            .jpeg_quality(self.jpeg_quality)
    }

    pub fn server_config(&self, stream_interval: Option<Duration>) -> ServerConfig {
        let config = ServerConfig::with_addr(self.listen)
            .path(self.path.clone())
            .max_viewers(self.max_viewers);
        match stream_interval {
            Some(interval) => config.stream_interval(interval),
            None => config,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub capture: CaptureArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Consumer group shared by all viewer nodes
    #[arg(long, env = "GROUPNAME", default_value = "frame-viewers")]
    pub group: String,

    /// Minimum time between two frames sent to one viewer
    #[arg(long, env = "FRAMEINTERVAL", value_parser = parse_duration)]
    pub frame_interval: Option<Duration>,

    #[command(flatten)]
    pub viewer: ViewerArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub viewer: ViewerArgs,

    /// Partitions of the in-process topic
    #[arg(long, default_value_t = 1)]
    pub partitions: i32,
}

/// Parse a duration such as `40ms` or `1s`
///
/// A bare integer is read as nanoseconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(nanos) = s.parse::<u64>() {
        return Ok(Duration::from_nanos(nanos));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_capture_size(s: &str) -> Result<(u32, u32), String> {
    parse_size(s).ok_or_else(|| format!("invalid size {s:?}, expected WIDTHxHEIGHT"))
}

/// Parse a listen address: `host:port`, `:port` or a bare port
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr, String> {
    let s = s.trim();
    let port_only = s.strip_prefix(':').unwrap_or(s);
    if let Ok(port) = port_only.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    if s.is_empty() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));
    }
    s.parse()
        .map_err(|e| format!("invalid listen address {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("40ms").unwrap(), Duration::from_millis(40));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("40000000").unwrap(), Duration::from_millis(40));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            parse_listen_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen_addr("9000").unwrap().port(), 9000);
        assert_eq!(
            parse_listen_addr("127.0.0.1:3000").unwrap(),
            "127.0.0.1:3000".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_listen_addr("nowhere").is_err());
    }

    #[test]
    fn test_parse_relay_command() {
        let cli = Cli::try_parse_from([
            "frame-relay",
            "relay",
            "--source",
            "pattern://64x48",
            "--frame-interval",
            "25ms",
            "--listen",
            ":9090",
            "--lookback",
            "2",
            "--overflow",
            "drop",
        ])
        .unwrap();

        let Command::Relay(args) = cli.command else {
            panic!("expected relay command");
        };
        assert_eq!(
            args.capture.source,
            SourceLocation::Pattern {
                width: 64,
                height: 48
            }
        );

        let producer = args.capture.producer_config();
        assert_eq!(producer.interval, Duration::from_millis(25));
        assert_eq!(producer.overflow, OverflowPolicy::Drop);
        assert_eq!(args.viewer.consumer_config().lookback, 2);
        assert_eq!(args.viewer.server_config(None).bind_addr.port(), 9090);
        assert_eq!(args.partitions, 1);
    }

    #[test]
    fn test_parse_consume_command() {
        let cli = Cli::try_parse_from([
            "frame-relay",
            "consume",
            "--broker",
            "kafka:9092",
            "--group",
            "wall",
            "--frame-interval",
            "50ms",
            "--path",
            "video",
            "--jpeg-quality",
            "60",
        ])
        .unwrap();

        let Command::Consume(args) = cli.command else {
            panic!("expected consume command");
        };
        assert_eq!(args.broker.broker, "kafka:9092");
        assert_eq!(args.group, "wall");

        let server = args.viewer.server_config(args.frame_interval);
        assert_eq!(server.path, "/video");
        assert_eq!(server.stream_interval, Some(Duration::from_millis(50)));
        assert_eq!(args.viewer.consumer_config().jpeg.quality(), 60);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["frame-relay", "relay", "--jpeg-quality", "0"]).is_err());
        assert!(Cli::try_parse_from(["frame-relay", "relay", "--capture-size", "640"]).is_err());
        assert!(Cli::try_parse_from(["frame-relay", "relay", "--overflow", "spill"]).is_err());
    }
}
