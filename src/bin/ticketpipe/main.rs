//! Ticketpipe entrypoint: spawns the ticket server, runs one fetch flow and
//! shuts the server down again.
//!
//! Exit codes: 0 success, 1 missing server path, 2 invalid arguments,
//! 3 signal handlers, 4 spawn, 5 reader start, 6 session failure.

mod flow;
mod output;

use crate::output::{emit_event, OutputEvent};
use std::process::ExitCode;
use ticketpipe::config::AppConfig;
use ticketpipe::pipe_session::ServerProcess;
use ticketpipe::signals::install_signal_handlers;
use ticketpipe::{
    init_logging, init_tracing, install_panic_hook, log_debug, log_file_path, ServerClient,
};

const EXIT_MISSING_SERVER: u8 = 1;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_SIGNALS: u8 = 3;
const EXIT_SPAWN: u8 = 4;
const EXIT_READER: u8 = 5;
const EXIT_SESSION: u8 = 6;

fn fail(code: u8, message: String) -> ExitCode {
    log_debug(&message);
    eprintln!("ticketpipe: {message}");
    ExitCode::from(code)
}

fn main() -> ExitCode {
    let config = match AppConfig::parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ticketpipe: {err:#}");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();
    log_debug(&format!(
        "ticketpipe v{} starting (log: {})",
        env!("CARGO_PKG_VERSION"),
        log_file_path().display()
    ));

    let Some(server) = config.server.clone() else {
        return fail(
            EXIT_MISSING_SERVER,
            "missing server path (usage: ticketpipe <SERVER>)".to_string(),
        );
    };

    if let Err(err) = install_signal_handlers() {
        return fail(EXIT_SIGNALS, format!("{err:#}"));
    }

    let process = match ServerProcess::spawn(&server) {
        Ok(process) => process,
        Err(err) => {
            return fail(
                EXIT_SPAWN,
                format!("failed to start {}: {err:#}", server.display()),
            )
        }
    };
    tracing::info!(server = %server.display(), pid = ?process.pid(), "server started");

    let mut client = match ServerClient::new(process, config.client_options()) {
        Ok(client) => client,
        Err(err) => return fail(EXIT_READER, format!("{err:#}")),
    };

    let outcome = flow::run(&mut client, &config);
    client.shutdown();

    match outcome {
        Ok(()) => {
            log_debug("ticketpipe finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let message = format!("{err:#}");
            emit_event(&OutputEvent::Error {
                message: message.clone(),
            });
            fail(EXIT_SESSION, message)
        }
    }
}
