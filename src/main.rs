//! Interactive command line for running one peer.
//!
//! The interface is a small page stack: the root page starts a server
//! or client, each endpoint gets a page with its own commands, and
//! `q` walks back up, stopping whatever the page was running. Prompts
//! show the page path, so `<sync_play/server>` means a server is up.
//!
//! Logging defaults to warnings to keep the prompt readable; set
//! `RUST_LOG` for more.

// ============================================================================
// Imports
// ============================================================================

use std::io::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use sync_play::{DEFAULT_BUDGET, DEFAULT_WEBDRIVER_URL, SyncClient, SyncServer, WebDriverAutomation};

// ============================================================================
// Arguments
// ============================================================================

/// Synchronized media playback across browser instances.
#[derive(Parser, Debug)]
#[command(name = "sync-play", version, about)]
struct Args {
    /// WebDriver endpoint to drive the browser through.
    #[arg(long, default_value = DEFAULT_WEBDRIVER_URL)]
    webdriver_url: String,

    /// Browser to request from the driver.
    #[arg(long, default_value = "firefox")]
    browser: String,
}

// ============================================================================
// Page Text
// ============================================================================

const BANNER: &str = "\
SyncPlay
Keeps media playback in several browsers in step. Type \"h\" for help.";

fn page_index(page: &str) -> &'static str {
    match page {
        "server" => "p) podcast   h) help   q) stop and leave",
        "client" => "s) sync   h) help   q) stop and leave",
        _ => "s) server   c) client   h) help   q) quit",
    }
}

fn page_help(page: &str) -> &'static str {
    match page {
        "server" => "\
p, podcast - push the local playback state to every connected peer
q, quit    - stop the server and go back
h, help    - this text",
        "client" => "\
s, sync - pull the server's playback state and apply it locally
q, quit - leave the server and go back
h, help - this text",
        _ => "\
s, server - start serving on a free port; other peers connect to it
c, client - join a server (asks for its IP, port, and your name)
q, quit   - close the browser and exit
h, help   - this text",
    }
}

// ============================================================================
// Repl
// ============================================================================

struct Repl {
    automation: Arc<WebDriverAutomation>,
    pages: Vec<&'static str>,
    server: Option<SyncServer>,
    client: Option<SyncClient>,
    input: Lines<BufReader<Stdin>>,
}

impl Repl {
    fn new(automation: Arc<WebDriverAutomation>) -> Self {
        Self {
            automation,
            pages: vec!["sync_play"],
            server: None,
            client: None,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    // ------------------------------------------------------------------------
    // Main Loop
    // ------------------------------------------------------------------------

    async fn run(&mut self) {
        println!("{BANNER}");
        self.print_page();
        loop {
            let Some(command) = self.read_command().await else {
                break;
            };
            if !self.handle(&command).await {
                self.output("Invalid command. Type \"h\" or \"help\" for help.");
            }
            if self.pages.is_empty() {
                println!("Terminating SyncPlay ...");
                break;
            }
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, command: &str) -> bool {
        match command {
            "h" | "help" => {
                self.print_help();
                true
            }
            "q" | "quit" | ".." => {
                self.leave_page().await;
                true
            }
            _ => match self.pages.last().copied() {
                Some("sync_play") => match command {
                    "s" | "server" => {
                        if self.start_server().await {
                            self.pages.push("server");
                            self.print_page();
                        }
                        true
                    }
                    "c" | "client" => {
                        if self.start_client().await {
                            self.pages.push("client");
                            self.print_page();
                        }
                        true
                    }
                    _ => false,
                },
                Some("server") => match command {
                    "p" | "podcast" => {
                        if let Some(server) = &self.server {
                            server.podcast().await;
                        }
                        true
                    }
                    _ => false,
                },
                Some("client") => match command {
                    "s" | "sync" => {
                        if let Some(client) = &self.client {
                            if let Err(err) = client.sync().await {
                                self.output(&format!("Sync failed: {err}"));
                            }
                        }
                        true
                    }
                    _ => false,
                },
                _ => false,
            },
        }
    }

    // ------------------------------------------------------------------------
    // Endpoint Control
    // ------------------------------------------------------------------------

    async fn start_server(&mut self) -> bool {
        match SyncServer::start(self.automation.clone(), DEFAULT_BUDGET).await {
            Ok(server) => {
                self.output(&format!("Server started on port {}.", server.port()));
                self.server = Some(server);
                true
            }
            Err(err) => {
                self.output(&format!("Failed to start server: {err}"));
                false
            }
        }
    }

    async fn start_client(&mut self) -> bool {
        let Some(ip) = self.interact("Server IP:").await else {
            return false;
        };
        let Some(port) = self.interact("Server port:").await else {
            return false;
        };
        let Some(username) = self.interact("Username:").await else {
            return false;
        };

        let server_ip: IpAddr = match ip.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                self.output(&format!("Invalid IP address: \"{ip}\""));
                return false;
            }
        };
        let server_port: u16 = match port.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                self.output(&format!("Invalid port: \"{port}\""));
                return false;
            }
        };

        let server = SocketAddr::new(server_ip, server_port);
        match SyncClient::start(server, username, self.automation.clone(), DEFAULT_BUDGET).await {
            Ok(client) => {
                self.output(&format!("Client started on port {}.", client.port()));
                self.client = Some(client);
                true
            }
            Err(err) => {
                self.output(&format!(
                    "Failed to start client: {err}\nIP:\"{ip}\" Port:\"{port}\""
                ));
                false
            }
        }
    }

    /// Pops the current page, stopping whatever it was running.
    async fn leave_page(&mut self) {
        match self.pages.pop() {
            Some("server") => {
                if let Some(server) = self.server.take() {
                    match server.stop().await {
                        Ok(()) => self.output("Server stopped."),
                        Err(err) => self.output(&format!("Server stop failed: {err}")),
                    }
                }
                self.print_page();
            }
            Some("client") => {
                if let Some(client) = self.client.take() {
                    match client.stop().await {
                        Ok(()) => self.output("Client stopped."),
                        Err(err) => self.output(&format!("Client stop failed: {err}")),
                    }
                }
                self.print_page();
            }
            _ => {}
        }
    }

    async fn shutdown(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(err) = client.stop().await {
                warn!(error = %err, "stopping client failed");
            }
        }
        if let Some(server) = self.server.take() {
            if let Err(err) = server.stop().await {
                warn!(error = %err, "stopping server failed");
            }
        }
        if let Err(err) = self.automation.close().await {
            warn!(error = %err, "closing browser session failed");
        }
    }

    // ------------------------------------------------------------------------
    // Terminal
    // ------------------------------------------------------------------------

    fn output(&self, message: &str) {
        println!("<{}> {message}", self.pages.join("/"));
    }

    fn print_page(&self) {
        if let Some(page) = self.pages.last() {
            self.output(page_index(page));
        }
    }

    fn print_help(&self) {
        if let Some(page) = self.pages.last() {
            self.output(page_help(page));
        }
    }

    async fn interact(&mut self, message: &str) -> Option<String> {
        self.output(message);
        self.read_command().await
    }

    async fn read_command(&mut self) -> Option<String> {
        print!(">>> ");
        let _ = std::io::stdout().flush();
        match self.input.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            _ => None,
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let automation = match WebDriverAutomation::connect(&args.webdriver_url, &args.browser).await {
        Ok(automation) => Arc::new(automation),
        Err(err) => {
            eprintln!(
                "Could not start a browser session at {}: {err}",
                args.webdriver_url
            );
            eprintln!("Is the driver (geckodriver, chromedriver) running?");
            return ExitCode::FAILURE;
        }
    };

    Repl::new(automation).run().await;
    ExitCode::SUCCESS
}
