use nostr_sdk::prelude::Keys;
use threadcrumbs::{parse_target, render_thread, Config, RelayPool, SessionStatus, ThreadEngine};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let Some(entity) = std::env::args().nth(1) else {
        eprintln!("usage: threadcrumbs <note|nevent|naddr>");
        std::process::exit(2);
    };

    let (target, hints) = parse_target(&entity)?;
    let config = Config::from_env();

    let pool = RelayPool::new(
        Keys::generate(),
        config.relays.as_slice(),
        config.connect_timeout,
        config.ingest_timeout,
    )
    .await?;
    pool.ensure_relays(hints).await?;

    let max_indent = config.max_indent;
    let mut engine = ThreadEngine::new(pool, config);
    engine.view(target);

    let status = engine.run_until_idle().await;
    info!("done: {:?}", status);

    print!(
        "{}",
        render_thread(&engine.thread(), engine.profiles(), max_indent)
    );
    match status {
        SessionStatus::Empty => println!("no replies yet"),
        SessionStatus::Failed(err) => eprintln!("relay error: {}", err),
        _ => {}
    }

    Ok(())
}
