use backdrop::{
    logger, ArtifactFetcher, AspectRatio, Backend, Config, ImageGenClient, SessionContext,
    SubmitOptions,
};
use std::path::Path;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

async fn ask<R>(lines: &mut Lines<R>, question: &str) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut stdout = io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

fn print_catalog(session: &SessionContext) {
    println!();
    println!("Available models:");
    for (i, (name, entry)) in session.catalog().iter().enumerate() {
        println!(
            "  {}. {} [{}] - {}",
            i + 1,
            name,
            entry.backend,
            entry.description
        );
    }
}

async fn choose_model<R>(session: &mut SessionContext, lines: &mut Lines<R>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    print_catalog(session);
    let current = session
        .selected()
        .map(|(name, _)| name.to_string())
        .unwrap_or_default();
    let Some(answer) = ask(lines, &format!("Model number [{}]: ", current)).await? else {
        return Ok(false);
    };
    if answer.is_empty() {
        return Ok(true);
    }
    if answer.eq_ignore_ascii_case("quit") {
        return Ok(false);
    }

    let name = answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| session.catalog().get_index(i))
        .map(|(name, _)| name.clone());
    match name {
        Some(name) => {
            if let Err(e) = session.select_model(&name) {
                log::warn!("⚠️  {}", e);
            }
        }
        None => log::warn!("⚠️  '{}' is not a model number, keeping {}", answer, current),
    }
    Ok(true)
}

async fn choose_aspect_ratio<R>(backend: Backend, lines: &mut Lines<R>) -> io::Result<AspectRatio>
where
    R: AsyncBufRead + Unpin,
{
    let supported = AspectRatio::supported_by(backend);
    let listed: Vec<&str> = supported.iter().map(AspectRatio::as_str).collect();
    let answer = ask(
        lines,
        &format!("Aspect ratio ({}) [16:9]: ", listed.join(", ")),
    )
    .await?
    .unwrap_or_default();

    Ok(answer
        .parse::<AspectRatio>()
        .ok()
        .filter(|ratio| supported.contains(ratio))
        .unwrap_or(AspectRatio::Ratio16x9))
}

/// Re-asks until the answer parses and passes `accept`. Empty or EOF keeps `default`.
async fn ask_parsed<R, T, F>(
    lines: &mut Lines<R>,
    question: &str,
    default: T,
    accept: F,
) -> io::Result<T>
where
    R: AsyncBufRead + Unpin,
    T: std::str::FromStr + std::fmt::Display,
    F: Fn(&T) -> bool,
{
    loop {
        let prompt = format!("{} [{}]: ", question, default);
        let answer = match ask(lines, &prompt).await? {
            Some(answer) if !answer.is_empty() => answer,
            _ => return Ok(default),
        };
        match answer.parse::<T>() {
            Ok(value) if accept(&value) => return Ok(value),
            _ => log::warn!("⚠️  '{}' is not a valid value", answer),
        }
    }
}

async fn choose_replicate_settings<R>(
    lines: &mut Lines<R>,
    options: &mut SubmitOptions,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    options.output_format = ask_parsed(
        lines,
        "Output format (png, jpg)",
        options.output_format,
        |_| true,
    )
    .await?;
    options.safety_tolerance = ask_parsed(
        lines,
        "Safety tolerance, 0 strictest to 3",
        options.safety_tolerance,
        |level| *level <= 3,
    )
    .await?;
    options.image_prompt_strength = ask_parsed(
        lines,
        "Style strength, 0.0 to 1.0",
        options.image_prompt_strength,
        |strength| (0.0..=1.0).contains(strength),
    )
    .await?;
    options.raw = ask_parsed(lines, "Raw output (true, false)", options.raw, |_| true).await?;
    Ok(())
}

async fn choose_vertex_settings<R>(
    lines: &mut Lines<R>,
    options: &mut SubmitOptions,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    options.number_of_images = ask_parsed(
        lines,
        "Number of images",
        options.number_of_images,
        |count| *count >= 1,
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(logger::LoggerConfig::default())?;
    if env_loaded {
        log::info!("✅ .env file loaded");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let config = Config::from_env();
    logger::log_config_info(&config);
    if let Err(e) = config.validate() {
        log::error!("❌ {}", e);
        std::process::exit(1);
    }

    log::info!("🔄 Creating image generation client...");
    let client = match ImageGenClient::new(config).await {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ Failed to initialize client: {}", e);
            std::process::exit(1);
        }
    };
    for (backend, ok) in client.validate_connections().await {
        if ok {
            log::info!("✅ {} reachable", backend.vendor_name());
        } else {
            log::warn!("⚠️  {} connection check failed", backend.vendor_name());
        }
    }

    let fetcher = ArtifactFetcher::default();
    let mut session = SessionContext::new(client.catalog());
    let mut lines = BufReader::new(io::stdin()).lines();

    println!("Teams Background Generator");
    println!("Generate professional backgrounds for Microsoft Teams using AI. Type 'quit' to exit.");

    loop {
        if !choose_model(&mut session, &mut lines).await? {
            break;
        }
        let Some(backend) = session.selected_backend() else {
            break;
        };

        let Some(prompt) = ask(&mut lines, "Describe your background: ").await? else {
            break;
        };
        if prompt.is_empty() || prompt.eq_ignore_ascii_case("quit") {
            break;
        }

        let mut options = SubmitOptions {
            aspect_ratio: choose_aspect_ratio(backend, &mut lines).await?,
            ..Default::default()
        };
        match backend {
            Backend::Replicate => choose_replicate_settings(&mut lines, &mut options).await?,
            Backend::Vertex => choose_vertex_settings(&mut lines, &mut options).await?,
        }

        log::info!("🎨 Generating your Teams background...");
        let images = match session.submit(&client, &prompt, &options).await {
            Ok(images) => images.to_vec(),
            Err(e) => {
                log::error!("❌ {}", e);
                continue;
            }
        };

        for (idx, image) in images.iter().enumerate() {
            if image.artifact.is_remote() {
                log::info!("🔗 Direct link: {}", image.artifact.payload);
            }
            if let Err(e) = fetcher.save(&image.artifact, idx, Path::new(".")).await {
                log::error!("❌ {}", e);
            }
        }
    }

    log::info!("👋 Session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backdrop::OutputFormat;

    fn input(text: &'static str) -> Lines<BufReader<&'static [u8]>> {
        BufReader::new(text.as_bytes()).lines()
    }

    #[tokio::test]
    async fn test_replicate_settings_reask_out_of_range() {
        let mut lines = input("jpg\n7\n1\n1.5\n0.5\ntrue\n");
        let mut options = SubmitOptions::default();
        choose_replicate_settings(&mut lines, &mut options)
            .await
            .unwrap();
        assert_eq!(options.output_format, OutputFormat::Jpg);
        assert_eq!(options.safety_tolerance, 1);
        assert_eq!(options.image_prompt_strength, 0.5);
        assert!(options.raw);
        assert_eq!(options.number_of_images, 1);
    }

    #[tokio::test]
    async fn test_empty_answers_keep_defaults() {
        let mut lines = input("\n\n\n\n");
        let mut options = SubmitOptions::default();
        choose_replicate_settings(&mut lines, &mut options)
            .await
            .unwrap();
        assert_eq!(options, SubmitOptions::default());
    }

    #[tokio::test]
    async fn test_vertex_image_count() {
        let mut lines = input("0\n3\n");
        let mut options = SubmitOptions::default();
        choose_vertex_settings(&mut lines, &mut options).await.unwrap();
        assert_eq!(options.number_of_images, 3);
        assert_eq!(options.safety_tolerance, 2);

        let mut lines = input("9:16\n");
        assert_eq!(
            choose_aspect_ratio(Backend::Vertex, &mut lines).await.unwrap(),
            AspectRatio::Ratio9x16
        );
        let mut lines = input("9:16\n");
        assert_eq!(
            choose_aspect_ratio(Backend::Replicate, &mut lines).await.unwrap(),
            AspectRatio::Ratio16x9
        );
    }
}
