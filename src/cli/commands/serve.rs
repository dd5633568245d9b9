use crate::config::AppConfig;

pub async fn handle(config: &AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    match port {
        Some(port) => {
            let mut config = config.clone();
            config.api.port = port;
            crate::server::serve(&config).await
        }
        None => crate::server::serve(config).await,
    }
}
