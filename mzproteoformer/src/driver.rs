use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::parser::ValueSource;
use clap::{ArgMatches, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use thiserror::Error;

use tracing::{debug, info, warn};

use mzproteoform::{build_community, CommunityError, CommunityParams, ConfigurationError};

use crate::args::ParameterOverrides;
use crate::write::{read_input, write_output, CommunityReport};

#[derive(Debug, Error)]
pub enum MZProteoformerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read or write a JSON document: {0}")]
    SerializationError(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Failed to load the configuration: {0}")]
    ConfigError(
        #[source]
        #[from]
        Box<figment::Error>,
    ),
    #[error("Failed to write the configuration: {0}")]
    ConfigWriteError(
        #[source]
        #[from]
        toml::ser::Error,
    ),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        ConfigurationError,
    ),
    #[error("Failed to build the community: {0}")]
    CommunityError(
        #[source]
        #[from]
        CommunityError,
    ),
    #[error("Failed to create the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("{0}")]
    CommandLineError(
        #[source]
        #[from]
        clap::Error,
    ),
    #[error("The {0} task failed to complete")]
    TaskFailed(&'static str),
}

impl From<figment::Error> for MZProteoformerError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigError(Box::new(value))
    }
}

fn default_output_file() -> PathBuf {
    PathBuf::from("-")
}

fn default_threads() -> i32 {
    -1
}

/// Relate, cluster and decoy-score intact proteoform observations.
///
/// Read a JSON document of observations, theoretical and decoy proteoforms, build the
/// proteoform community, and write the relations, delta mass peaks, families and
/// false discovery rate estimate as JSON.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZProteoformer {
    /// The path to read the input document from, or if '-' is passed, read from STDIN.
    ///
    /// Gzip compressed documents are detected automatically.
    #[arg()]
    pub input_file: PathBuf,

    /// The path to write the output document to, or if '-' is passed, write to STDOUT.
    ///
    /// If the path ends with `.gz`, the output is gzip compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzproteoformer.toml` in the working directory.
    /// Environment variables prefixed with `MZPROTEOFORMER_` will be read too.
    #[arg(long = "config-file")]
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Write the fully resolved configuration to this TOML file
    #[arg(long = "write-config")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_config: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(short = 't', long = "threads", default_value_t = -1)]
    #[serde(default = "default_threads")]
    pub threads: i32,

    #[command(flatten)]
    #[serde(flatten)]
    pub overrides: ParameterOverrides,

    #[arg(
        skip,
        help = "Specifies the complete set of community parameters, overridden by any command line parameters"
    )]
    #[serde(default)]
    pub params: CommunityParams,
}

/// The driver options given explicitly on the command line. These outrank every
/// configuration file and the environment, while the command line's own defaults
/// rank below them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandLineFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_config: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<i32>,
    #[serde(flatten)]
    pub overrides: ParameterOverrides,
}

impl CommandLineFlags {
    pub fn from_matches(cli: &MZProteoformer, matches: &ArgMatches) -> Self {
        let given = |id: &str| matches!(matches.value_source(id), Some(ValueSource::CommandLine));
        Self {
            input_file: given("input_file").then(|| cli.input_file.clone()),
            output_file: given("output_file").then(|| cli.output_file.clone()),
            log_file: cli.log_file.clone().filter(|_| given("log_file")),
            write_config: cli.write_config.clone().filter(|_| given("write_config")),
            threads: given("threads").then_some(cli.threads),
            overrides: cli.overrides.clone(),
        }
    }
}

impl MZProteoformer {
    /// Merge the configuration layers, from lowest to highest precedence: the command
    /// line defaults, `mzproteoformer.toml`, `--config-file`, `MZPROTEOFORMER_`
    /// environment variables, and the flags given on the command line.
    pub fn configure(matches: &ArgMatches) -> Result<Self, MZProteoformerError> {
        let cli = Self::from_arg_matches(matches)?;
        let flags = CommandLineFlags::from_matches(&cli, matches);

        let mut config = Figment::new()
            .merge(Serialized::defaults(&cli))
            .merge(Toml::file("mzproteoformer.toml"));
        if let Some(path) = cli.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        let config = config
            .merge(Env::prefixed("MZPROTEOFORMER_").split("__"))
            .merge(Serialized::globals(&flags));
        Ok(config.extract()?)
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZProteoformerError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()?.into()
        };
        debug!("Using {} cores", num_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        Ok(pool)
    }

    /// The parameters after applying the command line overrides
    pub fn community_params(&self) -> CommunityParams {
        let mut params = self.params;
        self.overrides.apply(&mut params);
        params
    }

    fn write_resolved_config(&self, params: &CommunityParams) -> Result<(), MZProteoformerError> {
        if let Some(path) = self.write_config.as_ref() {
            let mut resolved = self.clone();
            resolved.params = *params;
            resolved.overrides = ParameterOverrides::default();
            resolved.write_config = None;
            std::fs::write(path, toml::to_string_pretty(&resolved)?)?;
            info!("Wrote resolved configuration to {}", path.display());
        }
        Ok(())
    }

    pub fn main(&self) -> Result<(), MZProteoformerError> {
        info!(
            "mzproteoformer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("?")
        );
        let params = self.community_params();
        params.validate()?;
        debug!("Using parameters {params:?}");
        self.write_resolved_config(&params)?;

        let pool = self.create_threadpool()?;
        pool.install(|| self.run_workflow(params))
    }

    fn run_workflow(&self, params: CommunityParams) -> Result<(), MZProteoformerError> {
        let (send_input, recv_input) = crossbeam_channel::bounded(1);
        let (send_report, recv_report) = crossbeam_channel::bounded(1);

        let start = Instant::now();
        let input_file = self.input_file.clone();
        let read_task = thread::spawn(move || -> Result<(), MZProteoformerError> {
            let input = read_input(&input_file)?;
            // The receiver only disconnects when the build has already failed
            if send_input.send(input).is_err() {
                warn!("The build stopped before the input was read");
            }
            Ok(())
        });

        let output_file = self.output_file.clone();
        let write_task = thread::spawn(move || write_output(&output_file, recv_report));

        let build_result = match recv_input.recv() {
            Ok(input) => build_community(input, params).map_err(MZProteoformerError::from),
            Err(_) => Err(MZProteoformerError::TaskFailed("read")),
        };

        match read_task.join() {
            Ok(o) => o?,
            Err(e) => {
                warn!("Failed to join reader task: {e:?}");
                return Err(MZProteoformerError::TaskFailed("read"));
            }
        }

        let community = build_result?;
        let build_done = Instant::now();
        let fdr = community.fdr();
        info!("Experimental Proteoforms: {}", community.experimental_ids().len());
        info!("Theoretical Proteoforms: {}", community.theoretical_ids().len());
        info!(
            "Decoy Groups: {} | Skipped Records: {}",
            community.decoy_groups().len(),
            community.skipped().len()
        );
        info!(
            "EE Relations: {} | ET Relations: {} | Unequal Label Relations: {}",
            community.ee_relations().len(),
            community.et_relations().len(),
            community.unequal_lysine_relations().len()
        );
        info!(
            "EE Peaks: {} | ET Peaks: {} | Accepted Peaks: {}",
            community.ee_peaks().len(),
            community.et_peaks().len(),
            fdr.total_accepted_peaks
        );
        info!(
            "Families: {} | Identified Families: {}",
            community.families().len(),
            community.families().iter().filter(|f| f.is_identified()).count()
        );
        info!(
            "Identified Experimental Proteoforms: {} | Decoy Mean: {:0.3} | Decoy Std. Dev.: {:0.3} | Estimated FDR: {:0.4}",
            fdr.target_identified,
            fdr.decoy_mean_identified,
            fdr.decoy_stddev_identified,
            fdr.estimated_fdr
        );

        if send_report.send(CommunityReport::from(community)).is_err() {
            warn!("The writer task stopped before the report was sent");
        }
        drop(send_report);

        match write_task.join() {
            Ok(o) => {
                o?;
            }
            Err(e) => {
                warn!("Failed to join writer task: {e:?}");
                return Err(MZProteoformerError::TaskFailed("write"));
            }
        }

        let done = Instant::now();
        let elapsed = done - start;
        if (done - build_done).as_secs_f64() > 2.0 {
            info!("Writing Elapsed Time: {:0.3?}", done - build_done);
        }
        info!("Total Elapsed Time: {:0.3?}", elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    fn matches_of(argv: &[&str]) -> ArgMatches {
        MZProteoformer::command().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let err = MZProteoformer::command()
            .try_get_matches_from(["mzproteoformer", "in.json", "--mass-tolerance", "-1"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert!(err.to_string().contains("`-1` is less than zero"));

        let err = MZProteoformer::command()
            .try_get_matches_from(["mzproteoformer", "in.json", "--peak-width", "-0.5"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_explicit_flags() {
        let matches = matches_of(&["mzproteoformer", "in.json", "-t", "4"]);
        let cli = MZProteoformer::from_arg_matches(&matches).unwrap();
        let flags = CommandLineFlags::from_matches(&cli, &matches);
        assert_eq!(flags.input_file, Some(PathBuf::from("in.json")));
        assert_eq!(flags.threads, Some(4));
        assert_eq!(flags.output_file, None);
        assert_eq!(flags.log_file, None);
        assert_eq!(flags.write_config, None);
    }

    #[test]
    fn test_flags_outrank_config_file() {
        let matches = matches_of(&[
            "mzproteoformer",
            "./tests/data/community.json",
            "--config-file",
            "./tests/data/community.toml",
            "-o",
            "from_cli.json",
            "--mass-tolerance",
            "7",
        ]);
        let args = MZProteoformer::configure(&matches).unwrap();
        assert_eq!(args.output_file, PathBuf::from("from_cli.json"));
        assert_eq!(args.input_file, PathBuf::from("./tests/data/community.json"));
        // Not given on the command line, so the file's value stands
        assert_eq!(args.threads, 2);
        let params = args.community_params();
        assert_eq!(params.tolerance.mass_tolerance, 7.0);
        assert_eq!(params.tolerance.retention_time_tolerance, 2.0);
    }

    #[test]
    fn test_config_file_replaces_defaults() {
        let matches = matches_of(&[
            "mzproteoformer",
            "./tests/data/community.json",
            "--config-file",
            "./tests/data/community.toml",
        ]);
        let args = MZProteoformer::configure(&matches).unwrap();
        assert_eq!(
            args.output_file,
            PathBuf::from("./tests/data/community.out.json.gz")
        );
        assert_eq!(args.community_params().tolerance.mass_tolerance, 5.0);
    }
}
