use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use wme_script::image::{Dialect, Listing, OpcodeMap, ScriptImage};
use wme_script::{EngineConfig, LoggerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Yaml,
    Toml,
    Text,
}

/// The `project.toml` the disassembler writes.
#[derive(Debug, Serialize, Deserialize)]
pub struct WmeProject {
    listing_file: PathBuf,
    format: Format,
    #[serde(default)]
    opcodes: Vec<u32>,
}

impl WmeProject {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("read {:?}", path.as_ref()))?;
        Ok(toml::from_str(&text)?)
    }

    fn opcode_map(&self) -> Result<OpcodeMap> {
        if self.opcodes.is_empty() {
            return Ok(OpcodeMap::standard());
        }
        Ok(OpcodeMap::for_dialect(&Dialect::Custom(self.opcodes.clone()))?)
    }
}

struct Assembler {
    listing: Listing,
    opcodes: OpcodeMap,
}

impl Assembler {
    /// Reads a project directory, or a single listing file (`.yaml`,
    /// `.yml`, `.toml`) assembled with the standard opcodes.
    fn new(input: impl AsRef<Path>) -> Result<Self> {
        let input = input.as_ref();
        if input.is_dir() {
            let project = WmeProject::new(input.join("project.toml"))?;
            let listing = Self::read_listing(&input.join(&project.listing_file), project.format)?;
            return Ok(Self { listing, opcodes: project.opcode_map()? });
        }

        let format = match input.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Format::Yaml,
            Some("toml") => Format::Toml,
            _ => bail!("cannot tell the listing format of {input:?}"),
        };
        let listing = Self::read_listing(input, format)?;
        Ok(Self { listing, opcodes: OpcodeMap::standard() })
    }

    fn read_listing(path: &Path, format: Format) -> Result<Listing> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read {path:?}"))?;
        Ok(match format {
            Format::Yaml => serde_yaml::from_str(&text)?,
            Format::Toml => toml::from_str(&text)?,
            Format::Text => bail!("text listings are for reading only; disassemble to yaml or toml"),
        })
    }

    fn assemble(&self) -> Result<Vec<u8>> {
        let bytes = self.listing.assemble(&self.opcodes)?;
        log::info!(
            "{}: {} instructions, {} bytes",
            self.listing.filename,
            self.listing.code.len(),
            bytes.len()
        );
        Ok(bytes)
    }
}

fn compile(input: impl AsRef<Path>, output: impl AsRef<Path>, config: &EngineConfig) -> Result<()> {
    let assembler = Assembler::new(input)?;
    let data = assembler.assemble()?;

    // The result must load under the same configuration the game will use.
    ScriptImage::load(data.clone(), &assembler.listing.filename, &config.load_options())?;
    std::fs::write(output.as_ref(), data)?;
    Ok(())
}

fn init_logger(config: &LoggerConfig) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(config.level_filter)
        .filter_module("wme_script", config.script_level_filter)
        .filter_module("assembler", config.script_level_filter)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Project directory or listing file.
    #[clap(short, long)]
    input: PathBuf,
    #[clap(short, long)]
    output: PathBuf,
    /// Engine configuration (JSON).
    #[clap(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    init_logger(&config.logger);

    if let Err(e) = compile(&args.input, &args.output, &config) {
        log::error!("Error: {e:#}");
        return Err(e);
    }
    Ok(())
}
