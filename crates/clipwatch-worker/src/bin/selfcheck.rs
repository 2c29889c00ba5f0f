use std::path::Path;

use clipwatch_media::{check_ffmpeg, check_streamlink};
use clipwatch_worker::ProcessorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ProcessorConfig::from_env()?;
    println!(
        "clipwatch-selfcheck: starting with channel={} work_dir={} clips_dir={}",
        config.stream.channel,
        config.capture.work_dir.display(),
        config.clip.clips_dir.display()
    );

    config.validate()?;
    ensure_dir(&config.capture.work_dir).await?;
    ensure_dir(&config.clip.clips_dir).await?;

    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("clipwatch-selfcheck: ffmpeg at {}", ffmpeg.display());
    let streamlink = check_streamlink().map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("clipwatch-selfcheck: streamlink at {}", streamlink.display());

    println!("clipwatch-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))?;
    Ok(())
}
