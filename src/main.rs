mod config;
mod models;
mod utils;

use anyhow::Context;
use dotenv::dotenv;
use log::{error, info};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};

use crate::config::Config;
use crate::utils::browser::Session;
use crate::utils::output::write_courses;
use crate::utils::portal::{scrape, Stage};

// Entry point for the async main function, powered by tokio runtime.
#[tokio::main]
async fn main() {
    // Loads environment variables from a `.env` file, if present.
    dotenv().ok();

    // Logs to the terminal with mixed output (both stdout and stderr) and automatic color support.
    if let Err(e) = TermLogger::init(
        LevelFilter::Info,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialise logging: {e}");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading configuration: {:#}", e);
            return;
        }
    };

    // Nothing downstream means anything without a browser.
    let session = match Session::launch(&config.browser)
        .await
        .context(Stage::LaunchBrowser)
    {
        Ok(session) => session,
        Err(e) => {
            error!("{:#}", e);
            return;
        }
    };

    let courses = match scrape(session.page(), &config).await {
        Ok(courses) => {
            info!("Complete, {} courses scraped. Closing browser.", courses.len());
            Some(courses)
        }
        Err(e) => {
            error!("{:#}", e);
            None
        }
    };

    // The browser is closed on every path once it has been launched. A failed close
    // still lets a completed scrape reach the file, since the data is already in memory.
    if let Err(e) = session.close().await.context(Stage::CloseBrowser) {
        error!("{:#}", e);
    }

    // Nothing is written unless every course was scraped.
    let Some(courses) = courses else {
        return;
    };

    match write_courses(&config.output, &courses).context(Stage::WriteOutput) {
        Ok(()) => info!("Grades written to {}", config.output.display()),
        Err(e) => error!("{:#}", e),
    }
}
