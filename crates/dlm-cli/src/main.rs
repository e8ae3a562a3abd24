use dlm_core::logging;

mod cli;

#[tokio::main]
async fn main() {
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    let code = cli::run_from_args().await;
    std::process::exit(code);
}
