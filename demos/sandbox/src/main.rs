use std::time::Duration;

use tracing_subscriber::EnvFilter;
use worldlink::prelude::*;
use worldlink::protocol::DVec2;
use worldlink::session::SessionError;

// ---------------------------------------------------------------------------
// World rules
// ---------------------------------------------------------------------------

const STEP: &str = "step";
const POSITION: &str = "pos";

/// `step(dx, dy)` moves the source entity by one offset.
fn install_rules(events: &worldlink::world::EventBus) {
    events.on(STEP, |world, event| {
        let offset = match (event.args.first(), event.args.get(1)) {
            (Some(Value::Float64(dx)), Some(Value::Float64(dy))) => DVec2::new(*dx, *dy),
            _ => return,
        };
        let here = match world.get(event.source.as_str(), POSITION) {
            Some(Value::Vector2(pos)) => *pos,
            _ => DVec2::ZERO,
        };
        if let Err(e) = world.set(&event.source, POSITION, Value::Vector2(here + offset)) {
            tracing::debug!(error = %e, "step on a vanished entity");
        }
    });
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn serve(config: ServerConfig) -> Result<(), WorldlinkError> {
    let server = Server::bind(config).await?;
    let handle = server.handle();
    {
        let mut world = handle.world();
        world.register_level("meadow", Value::map([("size", Value::Int32(64))]));
        world.change_level("meadow")?;
    }
    install_rules(handle.events());

    tracing::info!(addr = %server.local_addr(), "sandbox server ready");
    server.run().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

async fn wander(addr: &str, config: ClientConfig, steps: usize) -> Result<(), WorldlinkError> {
    let mut client = Client::connect(addr, config).await?;
    install_rules(client.events());

    loop {
        match client.next_event().await {
            Some(ClientEvent::Bootstrapped) => break,
            Some(ClientEvent::Error(e)) => return Err(WorldlinkError::Remote(e)),
            Some(_) => {}
            None => return Err(WorldlinkError::Closed),
        }
    }

    let me = client
        .world()
        .find(|e| {
            e.get(worldlink::LOCAL_PLAYER_COMPONENT).and_then(Value::as_str)
                == Some(client.local_id())
        })
        .map(|e| e.id().clone())
        .ok_or(WorldlinkError::Session(SessionError::NotJoined))?;
    tracing::info!(entity = %me, entities = client.world().len(), "joined");

    for _ in 0..steps {
        client.emit(Event::new(me.clone(), STEP).with_args(values![1.0, 0.5]))?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Some(event) = client.try_next_event() {
            tracing::debug!(?event, "client event");
        }
    }

    tracing::info!(
        pos = ?client.world().get(me.as_str(), POSITION),
        latency = ?client.latency(),
        "done wandering"
    );
    client.stop()?;
    client.closed().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

const USAGE: &str = "usage: sandbox server [config.json]\n       sandbox client <addr> <name> [steps]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["server"] => serve(ServerConfig::new()).await?,
        ["server", path] => serve(ServerConfig::load(path)?).await?,
        ["client", addr, name] => wander(addr, ClientConfig::new(*name), 20).await?,
        ["client", addr, name, steps] => wander(addr, ClientConfig::new(*name), steps.parse()?).await?,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wander_leaves_world_clean() {
        let server = Server::bind(
            ServerConfig::new()
                .bind("127.0.0.1:0")
                .accept_poll(Duration::from_millis(5)),
        )
        .await
        .unwrap();
        let handle = server.handle();
        install_rules(handle.events());
        let addr = server.local_addr().to_string();
        tokio::spawn(server.run());

        wander(&addr, ClientConfig::new("Wanderer"), 2).await.unwrap();

        // The wanderer's LEAVE removes its entity once the server reads it.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.world().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_step_rule_accumulates_offsets() {
        let bus = worldlink::world::EventBus::new();
        install_rules(&bus);
        let mut world = World::new();
        let id = world.spawn(None, vec![]).unwrap();

        let step = Event::new(id.clone(), STEP).with_args(values![1.0, 0.5]);
        bus.dispatch(&mut world, &step);
        bus.dispatch(&mut world, &step);

        assert_eq!(
            world.get(id.as_str(), POSITION),
            Some(&Value::Vector2(DVec2::new(2.0, 1.0)))
        );
    }
}
