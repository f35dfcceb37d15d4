//! Various pemscout-wide constants.


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `pemscout` binary.
pub const PEMSCOUT_APP: &str = "pemscout";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “warn.”
pub const PEMSCOUT_ENV_LOG_LEVEL: &str = "PEMSCOUT_LOG_LEVEL";

/// The environment variable with the log target.
///
/// The variable should contain the name of a
/// [`LogType`][crate::config::LogType]. It will be overwritten by the
/// config file. The default is “stderr.”
pub const PEMSCOUT_ENV_LOG_TYPE: &str = "PEMSCOUT_LOG_TYPE";


//------------ PEM Labels ---------------------------------------------------

/// Labels of unencrypted private keys.
///
/// These are encrypted only if they carry a `Proc-Type` header announcing
/// legacy OpenSSL encryption.
pub const PRIVATE_KEY_LABELS: &[&str] = &[
    "PRIVATE KEY",
    "RSA PRIVATE KEY",
    "EC PRIVATE KEY",
    "DSA PRIVATE KEY",
];

/// The label of a PKCS#8 encrypted private key.
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Labels of public keys.
pub const PUBLIC_KEY_LABELS: &[&str] = &["PUBLIC KEY", "RSA PUBLIC KEY"];

/// Labels of certificates.
pub const CERTIFICATE_LABELS: &[&str] = &[
    "CERTIFICATE",
    "X509 CERTIFICATE",
    "TRUSTED CERTIFICATE",
];


//------------ PEM Headers --------------------------------------------------

/// The RFC 1421 header used by OpenSSL for legacy encrypted keys.
pub const PROC_TYPE_HEADER: &str = "Proc-Type";

/// The default header a public key uses to declare which key it belongs
/// to.
pub const DEFAULT_KEY_ID_HEADER: &str = "Key-Id";


//------------ Scanning -----------------------------------------------------

/// Default upper bound for the size of files we are willing to read.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Default number of discovered blocks buffered between the walkers and
/// the matcher.
pub const DEFAULT_BLOCK_QUEUE: usize = 256;

/// Number of results buffered between the matcher and the consumer.
pub const SCAN_RESULT_QUEUE: usize = 64;
