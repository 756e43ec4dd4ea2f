use std::fs;
use std::io;
use std::path;
use std::process;

use clap::ArgEnum;
use env_logger;
use log;

use pways::{ExternalSorter, ExternalSorterBuilder, IntegerLines, RunPolicy};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let fan_in: usize = arg_parser.value_of_t_or_exit("p");
    let tmp_dir = arg_parser.value_of("tmp_dir").unwrap_or(".");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let threshold: Option<usize> = arg_parser
        .is_present("threshold")
        .then(|| arg_parser.value_of_t_or_exit("threshold"));
    let replacement = arg_parser.is_present("replacement");

    let input = arg_parser.value_of("input").expect("value is required");
    let input_stream = match fs::File::open(input) {
        Ok(file) => io::BufReader::new(file),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");

    let mut sorter_builder = ExternalSorterBuilder::new(fan_in);
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }
    sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    if replacement {
        sorter_builder = sorter_builder.with_run_policy(RunPolicy::ReplacementSelection);
    } else if let Some(threshold) = threshold {
        sorter_builder = sorter_builder.with_run_policy(RunPolicy::FixedThreshold(threshold));
    }

    let sorter: ExternalSorter<io::Error> = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let records = IntegerLines::new(input_stream);
    let report = match sorter.sort(records, path::Path::new(output)) {
        Ok(report) => report,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    println!("#Regs\tWays\t#Runs\t#Passes");
    println!(
        "{}\t{}\t{}\t{}",
        report.records, report.fan_in, report.initial_runs, report.merge_passes
    );
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
    clap::App::new("pways")
        .about("p-way external merge sorter for newline-delimited integers")
        .arg(
            clap::Arg::new("p")
                .help("fan-in: working-set size in records and runs merged per step")
                .required(true)
                .index(1)
                .validator(|v| match v.parse::<usize>() {
                    Ok(p) if p >= 2 => Ok(()),
                    Ok(p) => Err(format!("p must be at least 2, got {}", p)),
                    Err(err) => Err(format!("p must be an integer: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("input")
                .help("file to be sorted")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("output")
                .help("result file")
                .required(true)
                .index(3),
        )
        .arg(
            clap::Arg::new("threshold")
                .short('T')
                .long("threshold")
                .help("flush threshold in records for the fixed run-boundary policy")
                .takes_value(true)
                .conflicts_with("replacement")
                .validator(|v| match v.parse::<usize>() {
                    Ok(t) if t >= 1 => Ok(()),
                    Ok(_) => Err("threshold must be at least 1".to_string()),
                    Err(err) => Err(format!("threshold must be an integer: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("replacement")
                .short('r')
                .long("replacement-selection")
                .help("cut runs with classical replacement selection instead of a fixed threshold"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel group merging")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data (defaults to the working directory)")
                .takes_value(true),
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
        .get_matches()
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
