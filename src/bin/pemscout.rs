use pemscout::cli::{self, Options};

#[tokio::main]
async fn main() {
    match cli::run(Options::from_args()).await {
        Ok(true) => {}
        Ok(false) => ::std::process::exit(1),
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(2);
        }
    }
}
