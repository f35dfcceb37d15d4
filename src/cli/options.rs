//! The command line options for pemscout.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use log::{info, LevelFilter};
use tokio_util::sync::CancellationToken;

use crate::cache::{IdentityIndexer, IndexCache, IndexEntry, KeyIndexer};
use crate::commons::error::Error;
use crate::config::Config;
use crate::scanner::{HiddenFiles, ScanOptions, Scanner};
use super::report::{ItemReport, Report, ReportFormat};


//------------ Options -------------------------------------------------------

/// The command line options for pemscout.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Finds private keys and certificates and pairs them up.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Creates the config these options ask for.
    pub fn config(&self) -> Result<Config, Error> {
        let mut config = Config::create(self.general.config.as_deref())?;
        if let Some(level) = self.general.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}


//------------ GeneralOptions ------------------------------------------------

/// The options common to all commands.
#[derive(clap::Args)]
pub struct GeneralOptions {
    /// Path to the config file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(
        short, long,
        env = "PEMSCOUT_FORMAT",
        default_value = "text",
    )]
    pub format: ReportFormat,

    /// Override the log level of the config.
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<LevelFilter>,
}


//------------ ScanArgs ------------------------------------------------------

/// The arguments shared by all commands that scan.
#[derive(clap::Args)]
pub struct ScanArgs {
    /// Also look into hidden files and directories.
    #[arg(long)]
    pub hidden: bool,

    /// Do not descend into sub-directories.
    #[arg(long)]
    pub no_recurse: bool,

    /// Do not report keys and certificates that could not be paired.
    #[arg(long)]
    pub no_unmatched: bool,

    /// The files and directories to scan.
    #[arg(required = true, value_name = "ROOT")]
    pub roots: Vec<PathBuf>,
}

impl ScanArgs {
    /// Returns the configured scan options with the arguments applied.
    pub fn scan_options(&self, config: &Config) -> ScanOptions {
        let mut options = config.scan_options();
        if self.hidden {
            options.hidden_files = HiddenFiles::Include;
        }
        if self.no_recurse {
            options.recursive = false;
        }
        if self.no_unmatched {
            options.suppress_unmatched = true;
        }
        options
    }
}


//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Scan and print results as they are found.
    Find(Find),

    /// Scan and look up identities or keys.
    Lookup(Lookup),
}

impl Command {
    /// Runs the command, printing results to `out`.
    ///
    /// Returns whether anything was found.
    pub async fn run(
        self,
        config: &Config,
        format: ReportFormat,
        out: &mut dyn Write,
    ) -> Result<bool, Error> {
        match self {
            Command::Find(cmd) => cmd.run(config, format, out).await,
            Command::Lookup(cmd) => cmd.run(config, format, out).await,
        }
    }
}


//------------ Find ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Find {
    /// Look for keys only instead of pairing them with certificates.
    #[arg(long)]
    pub keys: bool,

    #[command(flatten)]
    pub scan: ScanArgs,
}

impl Find {
    pub async fn run(
        self,
        config: &Config,
        format: ReportFormat,
        out: &mut dyn Write,
    ) -> Result<bool, Error> {
        let scanner = Scanner::new(self.scan.scan_options(config));
        let cancel = CancellationToken::new();
        let mut stream = if self.keys {
            scanner.find_keys(cancel, self.scan.roots)
        } else {
            scanner.find_identities(cancel, self.scan.roots)
        };

        let mut found = 0usize;
        while let Some(item) = stream.next().await {
            if !item.is_unmatched() {
                found += 1;
            }
            let line = ItemReport::from(&item).report(format)?;
            writeln!(out, "{}", line).map_err(|e| {
                Error::custom(format!("Cannot write output: {}", e))
            })?;
        }
        info!("Found {} result(s)", found);
        Ok(found > 0)
    }
}


//------------ Lookup --------------------------------------------------------

#[derive(clap::Parser)]
pub struct Lookup {
    /// Index keys by identifier instead of identities by subject.
    #[arg(long)]
    pub keys: bool,

    /// Return all entries.
    #[arg(short, long, conflicts_with = "query")]
    pub all: bool,

    /// The certificate subject or key identifier to look up.
    #[arg(short, long, required_unless_present = "all")]
    pub query: Option<String>,

    #[command(flatten)]
    pub scan: ScanArgs,
}

impl Lookup {
    pub async fn run(
        self,
        config: &Config,
        format: ReportFormat,
        out: &mut dyn Write,
    ) -> Result<bool, Error> {
        let scanner = Scanner::new(self.scan.scan_options(config));
        let query = if self.all { None } else { self.query.as_deref() };
        let roots = self.scan.roots.clone();

        let reports = if self.keys {
            let cache = IndexCache::new(scanner, KeyIndexer);
            lookup(&cache, roots, query)
                .await
                .iter()
                .map(|entry| ItemReport::from(entry.value()))
                .collect::<Vec<_>>()
        } else {
            let cache = IndexCache::new(scanner, IdentityIndexer);
            lookup(&cache, roots, query)
                .await
                .iter()
                .map(|entry| ItemReport::from(entry.value()))
                .collect::<Vec<_>>()
        };

        let res = reports.report(format)?;
        write!(out, "{}", res).map_err(|e| {
            Error::custom(format!("Cannot write output: {}", e))
        })?;
        Ok(!reports.is_empty())
    }
}

async fn lookup<V: Clone + Send + Sync + 'static>(
    cache: &IndexCache<V>,
    roots: Vec<PathBuf>,
    query: Option<&str>,
) -> Vec<IndexEntry<V>> {
    cache.refresh(roots);
    let res = match query {
        Some(query) => cache.get(query).await.into_iter().collect(),
        None => cache.get_all().await,
    };
    cache.shutdown();
    res
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::error::Error;
    use crate::test;

    fn run(args: &[&str]) -> Result<(bool, String), Error> {
        let options = Options::try_parse_from(args).unwrap();
        let config = options.config()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut out = Vec::new();
        let found = runtime.block_on(
            options.command.run(&config, options.general.format, &mut out)
        )?;
        Ok((found, String::from_utf8(out).unwrap()))
    }

    fn write_identity(dir: &std::path::Path, name: &str) -> String {
        let pkey = test::new_key();
        let cert = test::self_signed_cert(&pkey, name, 1);
        test::save_file(
            dir,
            &format!("{name}.key"),
            &pkey.private_key_to_pem_pkcs8().unwrap(),
        );
        test::save_file(dir, &format!("{name}.crt"), &cert.to_pem().unwrap());
        test::public_key(&pkey).fingerprint().to_string()
    }

    #[test]
    fn parse_arguments() {
        assert!(Options::try_parse_from(["pemscout", "find"]).is_err());
        assert!(
            Options::try_parse_from(["pemscout", "lookup", "/tmp"]).is_err()
        );
        assert!(
            Options::try_parse_from([
                "pemscout", "lookup", "--all", "-q", "CN=A", "/tmp"
            ])
            .is_err()
        );

        let options = Options::try_parse_from([
            "pemscout", "-f", "json", "-l", "debug",
            "find", "--keys", "--hidden", "a", "b",
        ])
        .unwrap();
        assert_eq!(options.general.format, ReportFormat::Json);
        assert_eq!(options.general.log_level, Some(LevelFilter::Debug));
        match options.command {
            Command::Find(find) => {
                assert!(find.keys);
                assert_eq!(find.scan.roots.len(), 2);
                let scan = find.scan.scan_options(&Config::default());
                assert_eq!(scan.hidden_files, HiddenFiles::Include);
                assert!(scan.recursive);
            }
            Command::Lookup(_) => panic!("expected find"),
        }
    }

    #[test]
    fn find_prints_identities() {
        test::test_under_tmp(|dir| {
            write_identity(&dir, "alice");
            let root = dir.to_string_lossy().to_string();

            let (found, out) =
                run(&["pemscout", "-f", "json", "find", &root]).unwrap();
            assert!(found);
            let lines = out.lines().collect::<Vec<_>>();
            assert_eq!(lines.len(), 1);
            let json: serde_json::Value =
                serde_json::from_str(lines[0]).unwrap();
            assert_eq!(json["type"], "identity");
            assert_eq!(json["certificate"]["subject"], "CN=alice");
        });
    }

    #[test]
    fn lookup_by_subject_and_key() {
        test::test_under_tmp(|dir| {
            write_identity(&dir, "alice");
            let bob = write_identity(&dir, "bob");
            let root = dir.to_string_lossy().to_string();

            let (found, out) =
                run(&["pemscout", "lookup", "-q", "CN=alice", &root]).unwrap();
            assert!(found);
            assert!(out.starts_with("identity 'CN=alice'"));

            let (found, out) =
                run(&["pemscout", "lookup", "-q", "CN=carol", &root]).unwrap();
            assert!(!found);
            assert!(out.is_empty());

            let (found, out) =
                run(&["pemscout", "lookup", "--keys", "-q", &bob, &root])
                    .unwrap();
            assert!(found);
            assert!(out.contains("bob.key"));

            let (_, out) = run(&["pemscout", "lookup", "--all", &root]).unwrap();
            assert_eq!(out.lines().count(), 2);
        });
    }
}
