use clap::Parser;
use log::{debug, error, info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use s3_benchmark::config::{BenchmarkConfig, TentativeConfig};
use s3_benchmark::error::BenchError;
use s3_benchmark::runner::BenchmarkRunner;
use std::path::{Path, PathBuf};

const LOG_NAME: &str = "s3_benchmark";

fn main() {
    let opt = Opt::parse();
    if let Err(e) = try_main(opt) {
        error!("{}", e);
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

// Errors from before logging is set up reach the terminal all the same.
fn try_main(opt: Opt) -> anyhow::Result<()> {
    let from_file = match opt.config {
        None => TentativeConfig::default(),
        Some(ref path) => TentativeConfig::read(path)?,
    };
    let config = from_file.merge(opt.tentative()).finish()?;

    let level = if opt.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    setup_logging(&config.log, level)?;

    info!("S3 benchmark program v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", config.parameters());
    debug!("{:#?}", config);

    run(config)?;

    info!("Benchmark completed.");
    Ok(())
}

fn run(config: BenchmarkConfig) -> Result<(), BenchError> {
    let runner = BenchmarkRunner::new(config)?;
    runner.setup()?;
    let perf = runner.run()?;
    perf.log();
    Ok(())
}

#[derive(Debug, Parser)]
#[clap(
    name = "s3-benchmark",
    version,
    about = "Measure object throughput of an S3-compatible storage service"
)]
struct Opt {
    /// YAML file with settings; command line options override it
    #[clap(long, short, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Access key
    #[clap(short = 'a', long)]
    access_key: Option<String>,

    /// Secret key
    #[clap(short = 's', long)]
    secret_key: Option<String>,

    /// URL for host with method prefix [default: http://s3.wasabisys.com]
    #[clap(short = 'u', long)]
    url: Option<String>,

    /// Bucket for testing [default: wasabi-benchmark-bucket]
    #[clap(short = 'b', long)]
    bucket: Option<String>,

    /// Duration of each test in seconds [default: 60]
    #[clap(short = 'd', long)]
    duration: Option<u64>,

    /// Number of threads to run [default: 1]
    #[clap(short = 't', long)]
    threads: Option<usize>,

    /// Number of times to repeat test [default: 1]
    #[clap(short = 'l', long)]
    loops: Option<usize>,

    /// Size of objects in bytes with postfix K, M, and G [default: 1M]
    #[clap(short = 'z', long)]
    size: Option<String>,

    /// File to append the log to [default: benchmark.log]
    #[clap(long, parse(from_os_str))]
    log: Option<PathBuf>,

    /// Log each request
    #[clap(long, short)]
    verbose: bool,
}

impl Opt {
    fn tentative(&self) -> TentativeConfig {
        TentativeConfig {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            url: self.url.clone(),
            bucket: self.bucket.clone(),
            duration: self.duration,
            threads: self.threads,
            loops: self.loops,
            size: self.size.clone(),
            log: self.log.clone(),
        }
    }
}

fn setup_logging(filename: &Path, level: LevelFilter) -> anyhow::Result<()> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%a %d %b %Y %H:%M:%S GMT)(utc)}: {m}{n}",
        )))
        .append(true)
        .build(filename)?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .logger(Logger::builder().build(LOG_NAME, level))
        .build(
            Root::builder()
                .appender("stdout")
                .appender("logfile")
                .build(LevelFilter::Warn),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}
