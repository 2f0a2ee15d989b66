//! Command-line front end for the continuity engine.
//!
//! Every command works on one novel project directory:
//!
//! ```bash
//! continuity --project my_novel add --category 人物 --name 杨尘 --attributes 职位=术研院主事 --chapter 3
//! continuity --project my_novel lock-list
//! continuity --project my_novel verify --chapter 12 --title 百草堂夜谈 --characters 杨尘,林婉
//! continuity --project my_novel check --chapter 12
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use continuity_core::foreshadowing::UpsertOutcome;
use continuity_core::telemetry::{self, LogConfig};
use continuity_core::{
    analyze_chapter, ActiveVerifier, ChapterInfo, ChapterRange, ClaudeConfig, ClaudeGenerator,
    ConsistencyChecker, EntityCategory, EntityExtractor, EntityLedger, ForeshadowingLedger,
    HttpEmbedder, MemoryIndex, ProjectPaths, RelevanceExtractor, ReviewContext, Section,
    VerificationConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "continuity", about = "Continuity ledgers and verification for long-form fiction")]
struct Cli {
    /// Project directory holding the ledgers and chapters
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    /// Also append log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the project layout and empty ledgers
    Init,

    /// List tracked entities
    Show {
        /// Only this category (人物/道具/场景/技能/其他 or English name)
        #[arg(long, value_parser = parse_category)]
        category: Option<EntityCategory>,
    },

    /// Add or update an entity's attributes
    Add {
        #[arg(long, value_parser = parse_category)]
        category: EntityCategory,

        #[arg(long)]
        name: String,

        /// Attributes as key=value pairs separated by commas
        #[arg(long)]
        attributes: String,

        #[arg(long, default_value_t = 0)]
        chapter: u32,
    },

    /// List recorded attribute changes
    Conflicts {
        #[arg(long)]
        from: Option<u32>,

        #[arg(long)]
        to: Option<u32>,
    },

    /// Print the entity lock list
    LockList {
        /// Include the standing writing requirements
        #[arg(long)]
        prompt: bool,
    },

    /// Write the entity ledger to another file
    Export {
        #[arg(long)]
        output: PathBuf,
    },

    /// Extract entities from a saved chapter with the model
    Analyze {
        #[arg(long)]
        chapter: u32,
    },

    /// Extract entities from every saved chapter, in order
    AnalyzeAll,

    /// Record foreshadowing for a chapter
    Foreshadow {
        #[arg(long)]
        chapter: u32,

        /// long or short
        #[arg(long)]
        section: Section,

        #[arg(long)]
        content: String,
    },

    /// Print the foreshadowing ledger
    Threads {
        /// Only blocks of this section
        #[arg(long)]
        section: Option<Section>,

        #[arg(long)]
        from: Option<u32>,

        #[arg(long)]
        to: Option<u32>,
    },

    /// Print the most query-relevant window of a text file
    Extract {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        query: String,

        #[arg(long, default_value_t = continuity_core::relevance::DEFAULT_WINDOW_SIZE)]
        window: usize,

        #[arg(long, default_value_t = continuity_core::relevance::DEFAULT_STEP)]
        step: usize,
    },

    /// Review a drafted chapter against the project's summary, state and ledgers
    Check {
        #[arg(long)]
        chapter: u32,
    },

    /// Check a chapter plan against earlier chapters
    Verify {
        #[arg(long)]
        chapter: u32,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        role: String,

        #[arg(long, default_value = "")]
        purpose: String,

        #[arg(long, default_value = "")]
        summary: String,

        #[arg(long, default_value = "")]
        characters: String,

        #[arg(long, default_value = "")]
        items: String,

        #[arg(long, default_value = "")]
        location: String,

        #[arg(long, default_value = "")]
        foreshadowing: String,

        #[arg(long, default_value_t = 5)]
        max_questions: usize,
    },
}

fn parse_category(value: &str) -> Result<EntityCategory, String> {
    EntityCategory::from_label(value).ok_or_else(|| format!("unknown category '{value}'"))
}

/// Parse `key=value` pairs separated by ASCII or full-width commas.
fn parse_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split([',', '，'])
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => bail!("attribute '{pair}' is not in key=value form"),
        })
        .collect()
}

fn chapter_range(from: Option<u32>, to: Option<u32>) -> Result<Option<ChapterRange>> {
    match (from, to) {
        (None, None) => Ok(None),
        (from, to) => Ok(Some(ChapterRange::new(
            from.unwrap_or(0),
            to.unwrap_or(u32::MAX),
        )?)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let mut log_config = LogConfig::default().with_filter(filter);
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(path);
    }
    let _log_guard = telemetry::install(&log_config).context("failed to set up logging")?;

    let paths = ProjectPaths::new(&cli.project);

    match cli.command {
        Commands::Init => cmd_init(&paths),
        Commands::Show { category } => cmd_show(&paths, category),
        Commands::Add {
            category,
            name,
            attributes,
            chapter,
        } => cmd_add(&paths, category, &name, &attributes, chapter),
        Commands::Conflicts { from, to } => cmd_conflicts(&paths, from, to),
        Commands::LockList { prompt } => cmd_lock_list(&paths, prompt),
        Commands::Export { output } => cmd_export(&paths, &output),
        Commands::Analyze { chapter } => cmd_analyze(&paths, Some(chapter)).await,
        Commands::AnalyzeAll => cmd_analyze(&paths, None).await,
        Commands::Foreshadow {
            chapter,
            section,
            content,
        } => cmd_foreshadow(&paths, chapter, section, &content),
        Commands::Threads { section, from, to } => cmd_threads(&paths, section, from, to),
        Commands::Extract {
            file,
            query,
            window,
            step,
        } => cmd_extract(&file, &query, window, step),
        Commands::Check { chapter } => cmd_check(&paths, chapter).await,
        Commands::Verify {
            chapter,
            title,
            role,
            purpose,
            summary,
            characters,
            items,
            location,
            foreshadowing,
            max_questions,
        } => {
            let info = ChapterInfo::new(chapter, title)
                .with_role(role)
                .with_purpose(purpose)
                .with_summary(summary)
                .with_characters(characters)
                .with_items(items)
                .with_location(location)
                .with_foreshadowing(foreshadowing);
            cmd_verify(&paths, &info, max_questions).await
        }
    }
}

fn cmd_init(paths: &ProjectPaths) -> Result<()> {
    paths.ensure_dirs().context("failed to create project directories")?;

    if !paths.entity_file().exists() {
        EntityLedger::for_project(paths)
            .save()
            .context("failed to create entity ledger")?;
    }
    if !paths.foreshadowing_file().exists() {
        ForeshadowingLedger::for_project(paths)
            .initialize()
            .context("failed to create foreshadowing ledger")?;
    }

    println!("Initialized project at {}", paths.root().display());
    Ok(())
}

fn cmd_show(paths: &ProjectPaths, category: Option<EntityCategory>) -> Result<()> {
    let ledger = EntityLedger::for_project(paths);
    let categories = match category {
        Some(category) => vec![category],
        None => EntityCategory::ALL.to_vec(),
    };

    for category in categories {
        let entities = ledger.get_entities_by_category(category);
        if entities.is_empty() {
            continue;
        }
        println!("【{}】", category.label());
        for entity in entities {
            println!(
                "  {}  (第{}章 - 第{}章, {} changes)",
                entity.render_attributes(),
                entity.first_seen_chapter,
                entity.last_updated_chapter,
                entity.history.len()
            );
        }
    }
    println!("{} entities", ledger.entity_count());
    Ok(())
}

fn cmd_add(
    paths: &ProjectPaths,
    category: EntityCategory,
    name: &str,
    attributes: &str,
    chapter: u32,
) -> Result<()> {
    let attributes = parse_attributes(attributes)?;
    let mut ledger = EntityLedger::for_project(paths);
    let changes = ledger.add_entity(category, name, attributes, chapter);
    ledger.save().context("failed to save entity ledger")?;

    for change in &changes {
        println!(
            "changed {}: '{}' -> '{}'",
            change.attribute, change.old_value, change.new_value
        );
    }
    if let Some(entity) = ledger.get_entity(category, name) {
        println!("{}", entity.render_attributes());
    }
    Ok(())
}

fn cmd_conflicts(paths: &ProjectPaths, from: Option<u32>, to: Option<u32>) -> Result<()> {
    let ledger = EntityLedger::for_project(paths);
    let conflicts = match chapter_range(from, to)? {
        Some(range) => ledger.conflicts_in_range(range),
        None => ledger.check_attribute_conflicts(),
    };

    for conflict in &conflicts {
        println!("{}", conflict.describe());
    }
    println!("{} attribute changes", conflicts.len());
    Ok(())
}

fn cmd_lock_list(paths: &ProjectPaths, prompt: bool) -> Result<()> {
    let ledger = EntityLedger::for_project(paths);
    if prompt {
        println!("{}", ledger.constraint_prompt());
    } else {
        println!("{}", ledger.generate_lock_list());
    }
    Ok(())
}

fn cmd_export(paths: &ProjectPaths, output: &Path) -> Result<()> {
    EntityLedger::for_project(paths)
        .export_to(output)
        .with_context(|| format!("failed to export to {}", output.display()))?;
    println!("Exported entity ledger to {}", output.display());
    Ok(())
}

async fn cmd_analyze(paths: &ProjectPaths, chapter: Option<u32>) -> Result<()> {
    let chapters = match chapter {
        Some(chapter) => vec![chapter],
        None => paths.chapter_numbers().context("failed to list chapters")?,
    };
    if chapters.is_empty() {
        println!("No chapters saved under {}", paths.chapters_dir().display());
        return Ok(());
    }

    let generator = ClaudeGenerator::from_env().context("failed to configure generator")?;
    let extractor = EntityExtractor::new(generator);
    let mut ledger = EntityLedger::for_project(paths);

    for chapter in chapters {
        let text = paths
            .read_chapter(chapter)
            .with_context(|| format!("failed to read chapter {chapter}"))?;
        let changes = analyze_chapter(&mut ledger, &extractor, &text, chapter).await;
        println!("第{chapter}章: {} attribute changes", changes.len());
        for change in changes {
            println!(
                "  {}: '{}' -> '{}'",
                change.attribute, change.old_value, change.new_value
            );
        }
    }

    ledger.save().context("failed to save entity ledger")?;
    Ok(())
}

fn cmd_foreshadow(
    paths: &ProjectPaths,
    chapter: u32,
    section: Section,
    content: &str,
) -> Result<()> {
    let mut ledger = ForeshadowingLedger::for_project(paths);
    let outcome = ledger.upsert(chapter, section, content);
    // an unreadable file was appended to directly and must not be rewritten
    if outcome != UpsertOutcome::Skipped && ledger.is_readable() {
        ledger.save().context("failed to save foreshadowing ledger")?;
    }

    match outcome {
        UpsertOutcome::Skipped => println!("Nothing to record"),
        UpsertOutcome::Inserted => println!("Added 第{chapter}章 ({})", section.label()),
        UpsertOutcome::Replaced => println!("Replaced 第{chapter}章 ({})", section.label()),
        UpsertOutcome::Addendum(e) => {
            println!("Ledger could not be parsed ({e}); appended 第{chapter}章 as an addendum")
        }
    }
    Ok(())
}

fn cmd_threads(
    paths: &ProjectPaths,
    section: Option<Section>,
    from: Option<u32>,
    to: Option<u32>,
) -> Result<()> {
    let ledger = ForeshadowingLedger::for_project(paths);
    let range = chapter_range(from, to)?;

    let Some(section) = section else {
        if range.is_some() {
            bail!("--from/--to need --section");
        }
        println!("{}", ledger.render());
        return Ok(());
    };

    let blocks = match range {
        Some(range) => ledger.blocks_in_range(section, range),
        None => ledger.blocks(section),
    }
    .context("foreshadowing ledger could not be parsed")?;

    for block in blocks {
        println!("第{}章：\n{}\n", block.chapter, block.content);
    }
    Ok(())
}

fn cmd_extract(file: &Path, query: &str, window: usize, step: usize) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    println!("{}", RelevanceExtractor::new(window, step).extract(&text, query));
    Ok(())
}

async fn cmd_check(paths: &ProjectPaths, chapter: u32) -> Result<()> {
    let text = paths
        .read_chapter(chapter)
        .with_context(|| format!("failed to read chapter {chapter}"))?;
    if text.trim().is_empty() {
        bail!("chapter {chapter} is empty, nothing to review");
    }

    let context = ReviewContext::from_project(
        paths,
        &EntityLedger::for_project(paths),
        &ForeshadowingLedger::for_project(paths),
    )
    .context("failed to read project state")?;

    let config = ClaudeConfig::from_env()
        .context("failed to configure generator")?
        .with_temperature(0.3);
    let checker = ConsistencyChecker::new(ClaudeGenerator::new(config)?);

    info!("Reviewing chapter {chapter}");
    println!("{}", checker.check(&context, &text).await);
    Ok(())
}

async fn cmd_verify(
    paths: &ProjectPaths,
    chapter: &ChapterInfo,
    max_questions: usize,
) -> Result<()> {
    let embedder = HttpEmbedder::from_env().context("failed to configure embedder")?;
    let index = MemoryIndex::new(Arc::new(embedder));

    let earlier: Vec<u32> = paths
        .chapter_numbers()
        .context("failed to list chapters")?
        .into_iter()
        .filter(|&n| n < chapter.number)
        .collect();
    for number in &earlier {
        let text = paths.read_chapter(*number)?;
        index
            .add_chapter(&text)
            .await
            .with_context(|| format!("failed to index chapter {number}"))?;
    }
    info!("Indexed {} earlier chapters", earlier.len());

    let generator = ClaudeGenerator::from_env().context("failed to configure generator")?;
    let verifier = ActiveVerifier::new(Arc::new(generator), Arc::new(index))
        .with_config(VerificationConfig::default().with_max_questions(max_questions));

    println!("{}", verifier.run_text(chapter).await);
    Ok(())
}
