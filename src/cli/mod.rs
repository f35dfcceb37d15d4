//! The pemscout command line client.

pub mod options;
pub mod report;

pub use self::options::Options;

use std::io;

use crate::commons::error::Error;
use crate::constants::PEMSCOUT_APP;


/// Runs the command given by the options.
///
/// Sets up logging as configured and prints results to stdout. Returns
/// whether the command found anything.
pub async fn run(options: Options) -> Result<bool, Error> {
    let config = options.config()?;
    config.init_logging()?;
    log::debug!("{} starting with {:?}", PEMSCOUT_APP, config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    options
        .command
        .run(&config, options.general.format, &mut out)
        .await
}
