use clap::{Parser, Subcommand};

/// Submits the readings of a water-quality probe to the collection backend.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, default probesync.json) The JSON configuration file, with the address and the
    /// keys of the backend.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Logs in with the volunteer code and password. The session is kept until logout.
    Login {
        #[clap(long, value_parser)]
        code: String,
        #[clap(long, value_parser)]
        password: String,
    },
    /// Forgets the stored session.
    Logout,
    /// Lists the collection points of the volunteer. The selected one is marked with *.
    Points,
    /// Changes the collection point the readings are submitted for.
    SelectPoint {
        #[clap(value_parser)]
        point_id: i64,
    },
    /// Checks a probe export without sending anything.
    Check {
        /// (file path) The .xlsx or .csv file exported by the probe.
        #[clap(value_parser)]
        file: String,
    },
    /// Imports a probe export: asks the survey for every reading, then submits the readings
    /// and uploads the annotated file.
    Import {
        /// (file path) The .xlsx or .csv file exported by the probe.
        #[clap(value_parser)]
        file: String,
        /// (file path, optional) A JSON list of answers, one per reading, instead of asking
        /// the questions on the terminal.
        #[clap(long, value_parser)]
        answers: Option<String>,
        /// Keeps the file after a successful import. By default it is removed.
        #[clap(long, takes_value = false)]
        keep_file: bool,
    },
    /// Shows the latest readings of the selected point.
    History {
        /// (default from the configuration, 50) The number of readings to show.
        #[clap(long, value_parser)]
        limit: Option<usize>,
    },
}
