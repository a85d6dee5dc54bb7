use chatterli::config::Config;

#[tokio::main]
async fn main() {
    // .envファイルがあれば読み込む（なければ無視）
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = chatterli::run(config).await {
        log::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
