//! Accept loop: binds the configured address, spawns one task per
//! connection, and hands each a [`SessionParams`] wired to the shared
//! in-memory backend. Grounded in the teacher's tokio demo server loop
//! (`assets/demos/tokio-server`), generalized to multiple concurrent
//! connections with a shared dispatcher and notification registry instead
//! of one hardcoded session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use imap_server::collaborators::{AccountStore, MailboxStore, TlsUpgrade};
use imap_server::config::ServerConfig;
use imap_server::dispatch::Dispatcher;
use imap_server::memory::{MemoryAccountStore, MemoryMailboxStore};
use imap_server::registry::ConnectionRegistry;
use imap_server::session_loop::{run_session, SessionParams};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "imap-server", about = "An async IMAP4rev1 command-processing front end")]
struct Cli {
    /// Path to a TOML config file. Missing fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `bind_addr` from the config file.
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Repeat for more verbosity: -v for debug, -vv for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let mut config = match &cli.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                return std::process::ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let tls = match build_tls(&config) {
        Ok(tls) => tls,
        Err(e) => {
            eprintln!("failed to load TLS material: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let accounts: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new([(
        "alice".to_string(),
        "wonderland".to_string(),
    )]));
    let mailboxes = Arc::new(MemoryMailboxStore::new());
    mailboxes.provision_inbox("alice").await;
    let mailboxes: Arc<dyn MailboxStore> = mailboxes;
    let registry = Arc::new(ConnectionRegistry::new());

    let dispatcher = Arc::new(Dispatcher {
        accounts,
        mailboxes,
        registry: registry.clone(),
        capabilities_unauthenticated: config.capabilities_unauthenticated.clone(),
        capabilities_authenticated: config.capabilities_authenticated.clone(),
        max_msg_size: config.max_msg_size,
        starttls_available: tls.is_some(),
    });

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", config.bind_addr);
            return std::process::ExitCode::FAILURE;
        }
    };
    log::info!("listening on {}", config.bind_addr);

    let mut id_counter: u64 = 0;
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        id_counter += 1;
        let id = id_counter;
        log::info!("connection {id} from {peer}");

        let params = SessionParams {
            id,
            dispatcher: dispatcher.clone(),
            registry: registry.clone(),
            tls: tls.clone(),
            idle_timeout: config.idle_timeout,
        };
        tokio::spawn(async move {
            run_session(params, Box::new(socket)).await;
            log::info!("connection {id} closed");
        });
    }
}

#[cfg(feature = "starttls")]
fn build_tls(config: &ServerConfig) -> std::io::Result<Option<Arc<dyn TlsUpgrade>>> {
    match &config.starttls {
        Some(material) => {
            let upgrade = tls_support::RustlsUpgrade::from_paths(&material.cert_path, &material.key_path)?;
            Ok(Some(Arc::new(upgrade)))
        }
        None => Ok(None),
    }
}

#[cfg(not(feature = "starttls"))]
fn build_tls(config: &ServerConfig) -> std::io::Result<Option<Arc<dyn TlsUpgrade>>> {
    if config.starttls.is_some() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "config requests STARTTLS but this binary was built without the starttls feature",
        ));
    }
    Ok(None)
}

#[cfg(feature = "starttls")]
mod tls_support {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use imap_server::collaborators::{AsyncReadWrite, TlsUpgrade};
    use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use tokio_rustls::{rustls, TlsAcceptor};

    pub struct RustlsUpgrade {
        acceptor: TlsAcceptor,
    }

    impl RustlsUpgrade {
        pub fn from_paths(cert_path: &Path, key_path: &Path) -> std::io::Result<Self> {
            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            let config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            Ok(RustlsUpgrade {
                acceptor: TlsAcceptor::from(Arc::new(config)),
            })
        }
    }

    #[async_trait]
    impl TlsUpgrade for RustlsUpgrade {
        async fn upgrade(
            &self,
            stream: Box<dyn AsyncReadWrite>,
        ) -> std::io::Result<Box<dyn AsyncReadWrite>> {
            let tls = self.acceptor.accept(stream).await?;
            Ok(Box::new(tls))
        }
    }

    fn load_certs(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
        let f = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(f);
        rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()
    }

    fn load_key(path: &Path) -> std::io::Result<PrivateKeyDer<'static>> {
        let f = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(f);
        rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found"))
    }
}
