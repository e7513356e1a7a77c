//! Locomotion CLI
//!
//! Runs scripted sessions against a dataset registry and converts dataset
//! files into their packed form.

#[cfg(feature = "cli")]
mod session;

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "mm_cli")]
#[command(about = "Run and inspect motion-matching locomotion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session and print one JSON line per tick
    Simulate {
        /// Registry directory (defaults to $MM_REGISTRY_DIR)
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Session script (YAML)
        #[arg(long)]
        script: PathBuf,

        #[arg(long, default_value_t = 120)]
        ticks: usize,

        /// Seconds per tick
        #[arg(long, default_value_t = 1.0 / 30.0)]
        dt: f32,
    },

    /// Print a summary of a dataset file
    Inspect {
        /// Dataset file (.json or .mmpk)
        dataset: PathBuf,
    },

    /// Convert an authored JSON dataset into a packed .mmpk file
    Pack {
        #[arg(long)]
        r#in: PathBuf,

        #[arg(long)]
        out: PathBuf,

        /// Read the packed file back and compare
        #[arg(long, default_value = "false")]
        verify: bool,

        /// Output metadata JSON file
        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// Print the JSON schemas of datasets, transition tables and tick input
    Schema,

    /// Write a synthetic walk/run registry for trying out `simulate`
    Synth {
        #[arg(long)]
        out: PathBuf,
    },
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            registry,
            script,
            ticks,
            dt,
        } => simulate(registry.as_deref(), &script, ticks, dt),
        Commands::Inspect { dataset } => inspect(&dataset),
        Commands::Pack {
            r#in,
            out,
            verify,
            metadata,
        } => pack(&r#in, &out, verify, metadata.as_deref()),
        Commands::Schema => schema(),
        Commands::Synth { out } => synth(&out),
    }
}

#[cfg(feature = "cli")]
fn simulate(registry: Option<&Path>, script: &Path, ticks: usize, dt: f32) -> Result<()> {
    use mm_core::DatasetRegistry;
    use std::io::Write;
    use std::sync::Arc;

    if !(dt > 0.0) {
        anyhow::bail!("--dt must be positive, got {dt}");
    }
    let registry = match registry {
        Some(dir) => DatasetRegistry::load_dir(dir).with_context(|| format!("loading registry {}", dir.display()))?,
        None => DatasetRegistry::from_env().context("loading registry from environment")?,
    };
    let text = std::fs::read_to_string(script).with_context(|| format!("reading {}", script.display()))?;
    let script = session::Script::from_yaml(&text)?;

    let mut session = session::Session::new(Arc::new(registry), &script)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = session.run(ticks, dt, |line| {
        serde_json::to_writer(&mut out, line)?;
        writeln!(out)?;
        Ok(())
    })?;
    if summary.terminated {
        eprintln!("session terminated after {} ticks", summary.ticks);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn inspect(path: &Path) -> Result<()> {
    use mm_core::dataset::registry::load_dataset_file;

    let dataset = load_dataset_file(path).with_context(|| format!("loading {}", path.display()))?;
    println!("Dataset {}", dataset.id());
    println!("   Rows:       {}", dataset.len());
    println!("   Dimensions: {}", dataset.layout().dims());
    println!(
        "   Layers:     {}",
        dataset.layers().iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "   Joints:     {}",
        dataset.required_joints().collect::<Vec<_>>().join(", ")
    );
    if let Some(idle) = dataset.idle_clip() {
        println!("   Idle clip:  {idle}");
    }
    println!("\n   Clips:");
    for clip in dataset.clips() {
        println!(
            "     {:<16} {:>6.2}s {:>5.1} Hz{}",
            clip.id.as_str(),
            clip.duration,
            clip.sample_rate,
            if clip.looping { "  loop" } else { "" }
        );
    }
    if !dataset.fallbacks().is_empty() {
        println!("\n   Fallbacks:");
        for fallback in dataset.fallbacks() {
            println!("     {:<16} bias {:.3}", fallback.clip.as_str(), fallback.cost_bias);
        }
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn pack(input: &Path, out: &Path, verify: bool, metadata: Option<&Path>) -> Result<()> {
    use mm_core::dataset::packed::{read_packed, write_packed};
    use mm_core::dataset::MotionDatasetDef;
    use mm_core::MotionDataset;

    let text = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let def: MotionDatasetDef = serde_json::from_str(&text).with_context(|| format!("parsing {}", input.display()))?;
    MotionDataset::from_def(def.clone()).context("dataset failed validation")?;

    let meta = write_packed(&def, out).with_context(|| format!("writing {}", out.display()))?;
    println!("Packed {} -> {}", input.display(), out.display());
    println!("   Original size:   {} bytes", meta.original_size);
    println!("   Compressed size: {} bytes", meta.compressed_size);
    println!("   Compression:     {:.1}%", meta.compression_ratio * 100.0);
    println!("   Checksum:        {}", meta.checksum);

    if verify {
        let back: MotionDatasetDef = read_packed(out).context("reading packed file back")?;
        if back != def {
            anyhow::bail!("packed dataset does not match its source");
        }
        println!("   Verified");
    }
    if let Some(path) = metadata {
        std::fs::write(path, serde_json::to_string_pretty(&meta)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn schema() -> Result<()> {
    use mm_core::controller::LocomotionInput;
    use mm_core::dataset::MotionDatasetDef;
    use mm_core::transition::TransitionTable;
    use schemars::schema_for;

    let schemas = serde_json::json!({
        "dataset": schema_for!(MotionDatasetDef),
        "transition_table": schema_for!(TransitionTable),
        "input": schema_for!(LocomotionInput),
    });
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

#[cfg(feature = "cli")]
fn synth(dir: &Path) -> Result<()> {
    use mm_core::dataset::testing::{locomotion_dataset_def, SyntheticOptions};
    use mm_core::settings::BlendPair;
    use mm_core::transition::{TransitionEntry, TransitionTable};

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (id, speeds) in [("walk", vec![0.8, 1.4, 2.0]), ("run", vec![2.5, 3.5, 4.5])] {
        let def = locomotion_dataset_def(&SyntheticOptions {
            id: id.to_string(),
            speeds,
            ..Default::default()
        });
        let path = dir.join(format!("{id}.json"));
        std::fs::write(&path, serde_json::to_string(&def)?).with_context(|| format!("writing {}", path.display()))?;
    }
    let table = TransitionTable {
        id: "default".into(),
        entries: vec![
            TransitionEntry {
                from: "walk".into(),
                to: "run".into(),
                blend: BlendPair::uniform(0.3),
            },
            TransitionEntry {
                from: "any".into(),
                to: "walk".into(),
                blend: BlendPair::uniform(0.5),
            },
        ],
    };
    let path = dir.join("default.transitions.yaml");
    std::fs::write(&path, serde_yaml::to_string(&table)?).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote synthetic registry to {}", dir.display());
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("mm_cli is not available. Enable the 'cli' feature to use it.");
    std::process::exit(1);
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use mm_core::DatasetRegistry;

    #[test]
    fn test_synth_registry_loads() {
        let dir = tempfile::tempdir().unwrap();
        synth(dir.path()).unwrap();
        let registry = DatasetRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.transition_table(&"default".into()).is_ok());
    }

    #[test]
    fn test_pack_and_inspect() {
        let dir = tempfile::tempdir().unwrap();
        synth(dir.path()).unwrap();
        let packed = dir.path().join("walk.mmpk");
        let meta = dir.path().join("walk.meta.json");
        pack(&dir.path().join("walk.json"), &packed, true, Some(&meta)).unwrap();
        assert!(meta.exists());
        inspect(&packed).unwrap();
    }

    #[test]
    fn test_simulate_rejects_bad_dt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(simulate(Some(dir.path()), &dir.path().join("none.yaml"), 10, 0.0).is_err());
    }
}
