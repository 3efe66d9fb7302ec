use std::str::FromStr;

use anyhow::Context;
use courier::http::request::Method;
use courier::{Config, Service, api};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut args = std::env::args().skip(1);
    let first = args.next().context("usage: courier [METHOD] URL [BODY]")?;
    let (method, url) = match Method::from_str(&first) {
        Ok(method) => (method, args.next().context("missing URL")?),
        Err(_) => (Method::GET, first),
    };

    let service = Service::with_handle(tokio::runtime::Handle::current(), cfg);
    let mut request = service.request(url);
    if let Some(body) = args.next() {
        request = request.body(body);
    }

    tokio::select! {
        res = api::send(&service, method, request) => {
            let response = res?;
            if response.error().is_error() {
                anyhow::bail!("{}", response.error());
            }
            let status = response.status();
            println!("HTTP/{}.{} {} {}", status.major, status.minor, status.code, status.reason);
            for (name, value) in response.headers().iter() {
                println!("{name}: {value}");
            }
            println!();
            println!("{}", response.text());
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    Ok(())
}
