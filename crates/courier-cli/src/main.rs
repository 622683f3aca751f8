//! courier demo
//!
//! `courier-cli [settings.json] [--tcp]`
//!
//! Hello を 1 件送り、handler が 2 回失敗したあと成功するまでを poller に回させる。
//! 設定ファイルにルールが無ければ `hello.v1` を loopback に流す。
//! `--tcp` を付けるとローカルの TcpReceiver 経由で自分自身に送る。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;
use url::Url;

use courier_core::app::{AppBuilder, Settings};
use courier_core::impls::{TcpReceiver, TcpSender};
use courier_core::routing::RoutingRule;
use courier_core::typed::{Handler, HandlerContext, HandlerError, Message};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Message for Hello {
    const TYPE: &'static str = "hello.v1";
}

struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, message: Hello, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::transient(format!(
                "intentional failure (attempts={})",
                ctx.attempts()
            )));
        }
        println!("Hello, {}!", message.name);
        Ok(())
    }
}

/// courier demo: send one hello through the outbox and watch it get handled.
#[derive(Parser)]
#[command(name = "courier")]
#[command(version)]
struct Cli {
    /// JSON settings file. Defaults to a fast-polling in-process setup.
    settings: Option<PathBuf>,

    /// Route hello through a local TCP listener instead of loopback
    #[arg(long)]
    tcp: bool,
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings {
            polling_interval_ms: 200,
            retry: courier_core::domain::RetryPolicy::new(
                Duration::from_millis(200),
                2.0,
                Duration::from_secs(5),
            ),
            ..Settings::default()
        });
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Settings::from_json(&json).with_context(|| format!("parse {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.settings.as_deref())?;

    // (A) 宛先: tcp なら先に listener を立てて自分の URI を得る
    // receiver は Bus ができてから bind するので、ポートだけ先に確保する
    let tcp_addr = if cli.tcp {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").context("reserve tcp port")?;
        Some(reserved.local_addr()?)
    } else {
        None
    };
    if settings.routing.is_empty() {
        let destination = match tcp_addr {
            Some(addr) => Url::parse(&format!("tcp://{addr}"))?,
            None => Url::parse("loopback://local")?,
        };
        settings.routing.push(RoutingRule::new(Hello::TYPE, destination));
    }

    // (B) Bus を組み立てる（不足があればここで失敗）
    let bus = AppBuilder::new()
        .settings(settings)
        .register::<Hello, _>(HelloHandler::new(2))?
        .expect_message_types(&[Hello::TYPE])
        .sender(Arc::new(TcpSender::default()))
        .build()?;

    let receiver = match tcp_addr {
        Some(addr) => Some(TcpReceiver::bind(&addr.to_string(), bus.messaging().clone()).await?),
        None => None,
    };
    let poller = bus.start_poller();

    // (C) 送信
    for delivery in bus.send(&Hello { name: "courier".into() }).await? {
        let id = delivery.envelope_id;
        let decision = delivery.wait().await?;
        println!("sent: id={id} decision={decision:?}");
    }

    // (D) inbox 側が終わるまで待つ（ctrl-c で中断）
    let wait = async {
        loop {
            let counts = bus.counts().await?;
            if counts.pending() == 0 {
                return anyhow::Ok(counts);
            }
            sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::select! {
        counts = wait => {
            let counts = counts?;
            println!("counts: {counts:?}");
            for dead in bus.dead_letters().await? {
                println!(
                    "dead letter: id={} attempts={} last_error={:?}",
                    dead.id, dead.attempts, dead.last_error
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    // (E) graceful shutdown
    poller.shutdown_and_join().await;
    if let Some(receiver) = receiver {
        receiver.shutdown_and_join().await;
    }
    Ok(())
}
