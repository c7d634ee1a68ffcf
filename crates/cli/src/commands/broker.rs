//! `agentbus broker`: Run the broker behind the gateway.

use agentbus_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🦀 AgentBus Broker");
    println!("   Listening:     {}:{}", config.gateway.host, config.gateway.port);
    println!("   WebSocket:     ws://{}:{}/v1/ws", config.gateway.host, config.gateway.port);
    println!("   Ring capacity: {}", config.broker.ring_capacity);

    agentbus_gateway::start(config).await?;

    Ok(())
}
