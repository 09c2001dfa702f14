#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    cli::main()
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("memslurp is currently not supported for OSes other than Linux");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
mod cli {
    use anyhow::Context;
    use clap::Parser;
    use clap_verbosity_flag::{Verbosity, WarnLevel};
    use memslurp::{RegionDump, ScanOptions, DEFAULT_MAX_REGION_SIZE};
    use nix::unistd::Pid;
    use std::{
        fs::File,
        io::{self, BufWriter, Write},
        path::PathBuf,
    };
    use tracing::info;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    /// memslurp: dump the readable memory of a running process
    ///
    /// Every readable region listed in `/proc/<pid>/maps` is read from `/proc/<pid>/mem` and
    /// written out back to back, without any framing. Regions that cannot be read are skipped.
    #[derive(Debug, Parser)]
    #[command(about, long_about, version)]
    pub struct Cli {
        /// Id of the process to dump.
        #[arg(value_parser = clap::value_parser!(i32).range(1..))]
        pub pid: i32,

        /// Stop the process with ptrace while its memory is read.
        #[arg(long, visible_alias = "attach")]
        pub ptrace: bool,

        /// Write the dump to this file instead of standard output.
        #[arg(short, long, value_name = "FILE")]
        pub output: Option<PathBuf>,

        /// Skip regions larger than this many bytes.
        #[arg(
            long,
            value_name = "BYTES",
            env = "MEMSLURP_MAX_REGION_SIZE",
            default_value_t = DEFAULT_MAX_REGION_SIZE
        )]
        pub max_region_size: u64,

        /// Read the memory map listing from this file instead of `/proc/<pid>/maps`.
        #[arg(long, value_name = "PATH")]
        pub maps: Option<PathBuf>,

        /// Read memory from this file instead of `/proc/<pid>/mem`.
        #[arg(long, value_name = "PATH")]
        pub mem: Option<PathBuf>,

        #[command(flatten)]
        pub verbosity: Verbosity<WarnLevel>,
    }

    impl Cli {
        pub fn scan_options(&self) -> ScanOptions {
            let mut options = ScanOptions::default()
                .with_attach(self.ptrace)
                .with_max_region_size(self.max_region_size);
            if let Some(maps) = &self.maps {
                options = options.with_maps_path(maps);
            }
            if let Some(mem) = &self.mem {
                options = options.with_mem_path(mem);
            }
            options
        }
    }

    pub fn main() -> anyhow::Result<()> {
        let cli = Cli::parse();

        // Logs go to stderr, stdout may be carrying the dump.
        let env_filter = EnvFilter::builder()
            .with_env_var("MEMSLURP_LOG")
            .from_env()?
            .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_level(true)
            .with_file(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(layer)
            .with(env_filter)
            .init();

        let pid = Pid::from_raw(cli.pid);
        let options = cli.scan_options();

        let mut sink: Box<dyn Write> = match &cli.output {
            Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
                format!("failed to open {} for writing", path.display())
            })?)),
            None => Box::new(BufWriter::new(io::stdout().lock())),
        };

        let summary = RegionDump::open(pid, &options)
            .and_then(|dump| dump.write_to(&mut sink))
            .with_context(|| format!("failed to dump memory of process {}", pid))?;

        info!(
            regions_seen = summary.regions_seen,
            regions_read = summary.regions_read,
            regions_skipped = summary.regions_skipped,
            bytes_written = summary.bytes_written,
            "dump complete"
        );
        Ok(())
    }

}
