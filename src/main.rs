use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge_sort::config::{MAX_PRESORT_MEMORY, MIN_PRESORT_MEMORY};
use ext_merge_sort::{ByteLines, Phase, RankedRecords, RecordStrategy, SortConfig, SortOutcome, SortState, Sorter};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t("log_level").unwrap_or_else(|err| usage_error(err));
    init_logger(log_level);

    let mut config = SortConfig::new();
    if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
        config = config.with_tmp_dir(path::Path::new(tmp_dir));
    }
    if arg_parser.is_present("merge_factor") {
        let merge_factor: usize = arg_parser.value_of_t("merge_factor").unwrap_or_else(|err| usage_error(err));
        config = config.with_merge_factor(merge_factor);
    }

    let memory: ByteSize = arg_parser.value_of_t("memory").unwrap_or_else(|err| usage_error(err));
    let max_memory = memory.as_u64().clamp(MIN_PRESORT_MEMORY, MAX_PRESORT_MEMORY);
    if max_memory != memory.as_u64() {
        log::warn!("memory {} is out of the supported range, using {}", memory, ByteSize(max_memory));
    }
    config = config.with_max_memory(max_memory);

    let input: Box<dyn Read> = match arg_parser.value_of("input") {
        Some(input) => Box::new(open_input(path::Path::new(input))),
        None => Box::new(io::stdin()),
    };

    let result = if arg_parser.is_present("ranked") {
        run_sort::<String, _>(config, RankedRecords, input)
    } else {
        run_sort::<Vec<u8>, _>(config, ByteLines, input)
    };

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

fn open_input(path: &path::Path) -> fs::File {
    if !path.is_file() {
        log::error!("input file {} does not exist or is not a regular file", path.display());
        process::exit(2);
    }

    match fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(2);
        }
    }
}

/// Sorts `input` into the standard output, reporting progress while the sort is running.
fn run_sort<T, S>(config: SortConfig, strategy: S, input: Box<dyn Read>) -> Result<(), ext_merge_sort::SortError>
where
    T: 'static,
    S: RecordStrategy<T> + 'static,
{
    let mut sorter = Sorter::new(config, strategy)?;

    let started = Instant::now();
    let (stop, reporter) = spawn_progress_reporter(sorter.state());

    let result = sorter.sort_stream(input, io::stdout());

    drop(stop);
    if reporter.join().is_err() {
        log::warn!("progress reporter panicked");
    }

    match result? {
        SortOutcome::Completed => log::info!("sorting completed in {:.3}s", started.elapsed().as_secs_f64()),
        SortOutcome::Cancelled => log::warn!("sorting cancelled"),
    }

    return Ok(());
}

/// Logs sort progress every [`PROGRESS_INTERVAL`] until the returned sender is dropped.
fn spawn_progress_reporter(state: Arc<SortState>) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
    let (stop, stopped) = mpsc::channel::<()>();

    let reporter = thread::spawn(move || {
        while let Err(mpsc::RecvTimeoutError::Timeout) = stopped.recv_timeout(PROGRESS_INTERVAL) {
            match state.phase() {
                Some(Phase::PreSorting) => {
                    log::info!("pre-sorting: {} sorted runs written", state.presort_run_count())
                }
                Some(Phase::Sorting) => log::info!(
                    "merging {} sorted runs: round {}/{}",
                    state.presort_run_count(),
                    state.current_merge_round() + 1,
                    state.total_merge_rounds()
                ),
                Some(Phase::Complete) => log::info!("writing sorted data"),
                None => {}
            }
        }
    });

    return (stop, reporter);
}

fn usage_error(err: clap::Error) -> ! {
    match err.kind() {
        clap::ErrorKind::DisplayHelp => err.exit(),
        _ => {
            // errors are reported before the logger is set up
            let _ = err.print();
            process::exit(1);
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge-sort")
        .about("memory-bounded external merge sorter: sorts input lines to the standard output")
        .arg(
            clap::Arg::new("input")
                .index(1)
                .help("file to be sorted, the standard input if omitted")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("ranked")
                .short('r')
                .long("ranked")
                .help("sort tab-separated ranked records by descending rank instead of raw lines"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store sorted runs")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("pre-sorting memory budget")
                .takes_value(true)
                .default_value("40MiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("merge_factor")
                .short('f')
                .long("merge-factor")
                .help("maximum number of sorted runs merged at once")
                .takes_value(true)
                .validator(|v| match v.parse::<usize>() {
                    Ok(factor) if factor > 1 => Ok(()),
                    Ok(factor) => Err(format!("Merge factor must be greater than 1, got {}", factor)),
                    Err(err) => Err(format!("Merge factor format incorrect: {}", err)),
                }),
        )
        .try_get_matches()
        .unwrap_or_else(|err| usage_error(err))
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
