//! Server implementation

#![warn(missing_docs)]

mod http;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use eyre::{bail, eyre, WrapErr};
use seckill_core::{Config, RequestHandler};
use seckill_gateway::EtcdClient;
use tracing::{error, info, info_span};

/// Command line options
#[derive(Debug, Default)]
struct Opts {
    /// Configuration file
    config: Option<PathBuf>,

    /// Host for the HTTP server to listen on
    host: Option<String>,
    /// Port for the HTTP server to listen on
    port: Option<u16>,
    /// Number of HTTP worker threads
    threads: Option<u32>,
}

impl Opts {
    fn from_args() -> eyre::Result<Self> {
        let mut opts = Opts::default();

        let mut option: Option<String> = None;
        for arg in std::env::args().skip(1) {
            if let Some(opt) = option.take() {
                match opt.as_str() {
                    "-config" => opts.config = Some(PathBuf::from(arg)),
                    "-host" => opts.host = Some(arg),
                    "-port" => {
                        opts.port = Some(arg.parse().wrap_err("-port takes a decimal u16")?)
                    }
                    "-threads" => {
                        opts.threads = Some(arg.parse().wrap_err("-threads takes a decimal u32")?)
                    }
                    _ => bail!("unknown option {opt}"),
                }
            } else {
                option = Some(arg);
            }
        }
        if let Some(opt) = option {
            bail!("leftover option {opt}");
        }

        Ok(opts)
    }

    /// Load the configuration: file, then environment, then command line
    fn config(&self) -> eyre::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        config.apply_env_overrides()?;

        if self.host.is_some() || self.port.is_some() {
            let (host, port) = config
                .http_addr
                .rsplit_once(':')
                .unwrap_or((config.http_addr.as_str(), "9091"));
            config.http_addr = format!(
                "{}:{}",
                self.host.as_deref().unwrap_or(host),
                self.port.map_or_else(|| port.to_owned(), |p| p.to_string())
            );
        }
        if let Some(threads) = self.threads {
            config.http_threads = threads;
        }

        config.validate()?;
        Ok(config)
    }
}

fn http_loop<H: RequestHandler>(server: &tiny_http::Server, handler: &H) {
    loop {
        let rq = match server.recv() {
            Ok(rq) => rq,
            Err(err) => {
                error!(error = %err, "HTTP receive failed");
                return;
            }
        };
        if let Some(rq) = http::parse(rq) {
            let span = info_span!("request", id = %rq.id(), path = rq.kind().path());
            let _guard = span.enter();
            handler.handle(rq);
        }
    }
}

fn main() -> eyre::Result<()> {
    let opts = Opts::from_args()?;
    let config = opts.config()?;
    logging::init(&config)?;
    info!(
        etcd = %config.etcd_addr,
        key = %config.product_key(),
        limit = config.user_sec_access_limit,
        algorithm = ?config.cookie_sign_algorithm,
        "starting"
    );

    let kv = EtcdClient::from_config(&config).wrap_err("cannot set up the etcd client")?;
    let gateway = seckill_gateway::launch(&config, Arc::new(kv))?;

    let server = tiny_http::Server::http(config.http_addr.as_str())
        .map_err(|err| eyre!("cannot listen on {}: {err}", config.http_addr))?;
    info!(addr = %config.http_addr, threads = config.http_threads, "listening");

    thread::scope(|s| -> eyre::Result<()> {
        for i in 0..config.http_threads {
            thread::Builder::new()
                .name(format!("http_{i}"))
                .spawn_scoped(s, || http_loop(&server, &gateway))?;
        }
        Ok(())
    })?;

    gateway.shutdown();
    Ok(())
}
