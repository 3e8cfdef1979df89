use tt_core::config::Config;

pub fn run(config: &Config) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    println!();
    println!("# config file: {}", Config::default_path().display());
    println!("# checkpoint dir: {}", config.checkpoint_dir().display());
    Ok(())
}
