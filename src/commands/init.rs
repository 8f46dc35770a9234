use anyhow::Result;
use regindex::config::Config;
use std::path::PathBuf;

pub async fn init_config(path: PathBuf) -> Result<()> {
    let config = Config::default();
    std::fs::create_dir_all(&path)?;
    let config_path = path.join("regindex.toml");

    if config_path.exists() {
        println!("Configuration file already exists: {}", config_path.display());
        return Ok(());
    }

    let toml_content = format!("# regindex configuration\n\n{}", config.to_toml()?);
    regindex::util::write_atomic(&config_path, toml_content.as_bytes())?;
    println!("Created configuration file: {}", config_path.display());
    println!("Data directory: {}", config.data.data_dir.display());
    println!("Upstream files: {}", config.download.files.len());

    Ok(())
}
