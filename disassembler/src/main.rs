use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser as ClapParser, ValueEnum};
use serde::{Deserialize, Serialize};
use wme_nls::Encoding;
use wme_script::image::{Listing, OpcodeMap, ScriptImage};
use wme_script::{EngineConfig, LoggerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Format {
    Yaml,
    Toml,
    Text,
}

impl Format {
    fn extension(self) -> &'static str {
        match self {
            Format::Yaml => "yaml",
            Format::Toml => "toml",
            Format::Text => "txt",
        }
    }
}

/// Project file written next to the listing; the assembler reads it back.
#[derive(Debug, Serialize, Deserialize)]
pub struct WmeProject {
    listing_file: PathBuf,
    format: Format,
    opcodes: Vec<u32>,
}

struct Disassembler {
    image: ScriptImage,
    opcodes: OpcodeMap,
    listing: Option<Listing>,
}

impl Disassembler {
    fn new(input: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let input = input.as_ref();
        let bytes = std::fs::read(input).with_context(|| format!("read {input:?}"))?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let image = ScriptImage::load(bytes, &name, &config.load_options())?;
        let opcodes = OpcodeMap::for_dialect(&config.dialect)?;
        log::info!(
            "{}: version {:#06x}, {} symbols, {} functions, {} events, {} methods, {} externals",
            name,
            image.version(),
            image.symbols().count(),
            image.functions().len(),
            image.events().len(),
            image.methods().len(),
            image.externals().len()
        );
        Ok(Self { image, opcodes, listing: None })
    }

    fn disassemble(&mut self) -> Result<&Listing> {
        let listing = Listing::from_image(&self.image, &self.opcodes)?;
        if let Some(last) = listing.code.last() {
            if last.mnemonic.starts_with("DB ") {
                log::warn!("unknown opcode {} at {:?}; listing stops there", last.mnemonic, last.address);
            }
        }
        Ok(self.listing.insert(listing))
    }

    fn render(&self, format: Format) -> Result<String> {
        let listing = self
            .listing
            .as_ref()
            .ok_or_else(|| anyhow!("nothing disassembled yet"))?;
        Ok(match format {
            Format::Yaml => serde_yaml::to_string(listing)?,
            Format::Toml => toml::to_string_pretty(listing)?,
            Format::Text => listing.to_string(),
        })
    }

    /// Writes the listing and a `project.toml` into `output`.
    fn write_project(&self, output: impl AsRef<Path>, format: Format) -> Result<()> {
        let output = output.as_ref();
        std::fs::create_dir_all(output)?;

        let listing_file = PathBuf::from(format!("listing.{}", format.extension()));
        std::fs::write(output.join(&listing_file), self.render(format)?)?;

        let opcodes = if self.opcodes.is_standard() {
            Vec::new()
        } else {
            (0..wme_script::image::OPCODE_COUNT as u32)
                .map(|raw| self.opcodes.decode(raw))
                .collect()
        };
        let project = WmeProject { listing_file, format, opcodes };
        std::fs::write(output.join("project.toml"), toml::to_string_pretty(&project)?)?;
        Ok(())
    }
}

fn init_logger(config: &LoggerConfig) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(config.level_filter)
        .filter_module("wme_script", config.script_level_filter)
        .filter_module("disassembler", config.script_level_filter)
        .try_init();
}

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Project directory to write.
    #[arg(short, long, required = true)]
    output: PathBuf,

    #[arg(short, long, value_enum, default_value = "yaml")]
    format: Format,

    /// Engine configuration (JSON) with the opcode dialect and encoding.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Windows code page of string literals, overriding the configuration.
    #[arg(long)]
    code_page: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(cp) = args.code_page {
        config.encoding = Encoding::from_code_page(cp).ok_or_else(|| anyhow!("unsupported code page {cp}"))?;
    }
    init_logger(&config.logger);

    let mut disassembler = Disassembler::new(&args.input, &config)?;
    disassembler.disassemble()?;
    disassembler.write_project(&args.output, args.format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wme_script::{ImageBuilder, Opcode};

    #[test]
    fn test_disassembler() -> Result<()> {
        let mut b = ImageBuilder::new();
        let start = b.here();
        b.line(1).push_string("hello").call_external("Print", 1).op(Opcode::PopEmpty);
        b.op(Opcode::Ret);
        b.event("LeftClick", start);

        let dir = std::env::temp_dir().join(format!("wme-disasm-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let input = dir.join("hello.script");
        std::fs::write(&input, b.build()?)?;

        let mut disassembler = Disassembler::new(&input, &EngineConfig::default())?;
        let listing = disassembler.disassemble()?;
        assert_eq!(listing.events[0].name, "LeftClick");
        assert_eq!(listing.code.len(), 6);

        let out = dir.join("project");
        disassembler.write_project(&out, Format::Yaml)?;
        let project: WmeProject = toml::from_str(&std::fs::read_to_string(out.join("project.toml"))?)?;
        assert_eq!(project.listing_file, PathBuf::from("listing.yaml"));
        assert!(project.opcodes.is_empty());

        let text = disassembler.render(Format::Text)?;
        assert!(text.contains("\"hello\""));

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
