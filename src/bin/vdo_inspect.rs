//! Offline inspection CLI: dumps derived UDS geometry and the contents of
//! VDO reference blocks, without going through a live [`vdo_core::Session`].
//!
//! ```text
//! vdo-inspect geometry --memory gb:1
//! vdo-inspect ref-blocks index.dat --offset 0 --block-count 128
//! ```

use clap::{Parser, Subcommand};
use vdo_core::config::{MemorySize, VDO_BLOCK_SIZE};
use vdo_core::error::{CoreError, Result};
use vdo_core::primitives::io::IoFactory;
use vdo_core::uds::Geometry;
use vdo_core::vdo::reference_block::unpack_reference_block;

#[derive(Parser)]
#[command(name = "vdo-inspect", about = "Inspect UDS geometry and VDO reference blocks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the chapter/page layout derived from a memory-size preset.
    Geometry {
        /// One of `mb256`, `mb512`, `mb768`, or `gb:<N>`.
        #[arg(long, default_value = "gb:1")]
        memory: String,
        /// Derive sparse-index geometry.
        #[arg(long)]
        sparse: bool,
    },
    /// Dump the counters and journal point packed into each reference
    /// block of a region.
    RefBlocks {
        /// Path to the region holding the reference blocks.
        path: String,
        /// Byte offset of the first reference block.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Number of consecutive reference blocks to dump.
        #[arg(long)]
        block_count: u32,
    },
}

fn parse_memory_size(s: &str) -> Result<MemorySize> {
    match s {
        "mb256" => Ok(MemorySize::Mb256),
        "mb512" => Ok(MemorySize::Mb512),
        "mb768" => Ok(MemorySize::Mb768),
        _ => {
            let n = s
                .strip_prefix("gb:")
                .and_then(|n| n.parse::<u32>().ok())
                .ok_or_else(|| CoreError::InvalidArgument(format!("unrecognized memory size: {s}")))?;
            Ok(MemorySize::Gb(n))
        }
    }
}

fn run_geometry(memory: &str, sparse: bool) -> Result<()> {
    let memory_size = parse_memory_size(memory)?;
    let geometry = Geometry::derive(memory_size, sparse);
    println!("records_per_page:          {}", geometry.records_per_page);
    println!("record_pages_per_chapter:  {}", geometry.record_pages_per_chapter);
    println!("index_pages_per_chapter:   {}", geometry.index_pages_per_chapter);
    println!("records_per_chapter:       {}", geometry.records_per_chapter);
    println!("chapters_per_volume:       {}", geometry.chapters_per_volume);
    println!("sparse_chapters_per_volume:{}", geometry.sparse_chapters_per_volume);
    println!("pages_per_chapter:         {}", geometry.pages_per_chapter());
    println!("bytes_per_chapter:         {}", geometry.bytes_per_chapter());
    println!("sparse:                    {}", geometry.sparse);
    Ok(())
}

fn run_ref_blocks(path: &str, offset: u64, block_count: u32) -> Result<()> {
    let factory = IoFactory::open(path)?;
    for idx in 0..block_count {
        let block_offset = offset + idx as u64 * VDO_BLOCK_SIZE as u64;
        let mut raw = vec![0u8; VDO_BLOCK_SIZE as usize];
        factory.read_at(block_offset, &mut raw)?;
        let unpacked = unpack_reference_block(&raw)?;
        let allocated = unpacked.counters.iter().filter(|&&c| c != 0).count();
        println!(
            "block {idx}: allocated={allocated} journal_point={:?} torn={} max_sector={}",
            unpacked.slab_journal_point, unpacked.torn, unpacked.max_sector
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    vdo_core::logging::init_logging("warn").ok();
    let cli = Cli::parse();
    match cli.command {
        Command::Geometry { memory, sparse } => run_geometry(&memory, sparse),
        Command::RefBlocks { path, offset, block_count } => run_ref_blocks(&path, offset, block_count),
    }
}
