use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;

use strata_codec::{BincodeFlattener, TreeReader, TreeWriter};
use strata_tree::{DiffScope, LayeredTree, Lineage};
use strata_types::{ChangeKind, Depth, EqualityComparator, TreePath};

use crate::cli::*;
use crate::config::CliConfig;
use crate::scan::{count_nodes, replay, scan_dir, EntryKind, FileEntry};

type Flattener = BincodeFlattener<FileEntry>;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Snapshot(args) => cmd_snapshot(args, &config),
        Command::Show(args) => cmd_show(args, &config, format),
        Command::Diff(args) => cmd_diff(args, &config, format),
        Command::Delta(args) => cmd_delta(args, &config),
        Command::Apply(args) => cmd_apply(args, &config),
        Command::Chain(args) => cmd_chain(args, &config),
        Command::Inspect(args) => cmd_inspect(args, &config, format),
    }
}

// ---------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------

fn tree_writer() -> TreeWriter<FileEntry, Flattener> {
    TreeWriter::new(Flattener::new())
}

fn tree_reader(config: &CliConfig) -> TreeReader<FileEntry, Flattener> {
    TreeReader::with_config(Flattener::new(), config.codec.clone())
}

fn parse_path(path: &str) -> anyhow::Result<TreePath> {
    path.parse()
        .with_context(|| format!("invalid tree path {path:?}"))
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn read_tree(path: &Path, config: &CliConfig) -> anyhow::Result<LayeredTree<FileEntry>> {
    let mut input = open(path)?;
    tree_reader(config)
        .read_tree(&mut input)
        .with_context(|| format!("reading tree stream {}", path.display()))
}

fn describe(entry: Option<&FileEntry>) -> String {
    match entry {
        None => "dir".to_string(),
        Some(FileEntry { kind: EntryKind::Symlink, size, .. }) => format!("symlink, {size} bytes"),
        Some(FileEntry { size, crc32, .. }) => format!("{size} bytes, crc {crc32:08x}"),
    }
}

fn change_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::NoChange => "unchanged",
        ChangeKind::Added => "added",
        ChangeKind::Removed => "removed",
        ChangeKind::Changed => "changed",
    }
}

// ---------------------------------------------------------------
// Commands
// ---------------------------------------------------------------

fn cmd_snapshot(args: SnapshotArgs, config: &CliConfig) -> anyhow::Result<()> {
    let path = parse_path(&args.path)?;
    let depth = Depth::from(args.depth);
    let tree = scan_dir(&args.dir, &config.scan)?;

    let mut out = create(&args.output)?;
    tree_writer().write_tree(&tree, &path, depth, &mut out)?;
    out.flush()?;

    println!(
        "{} Snapshot of {} written to {}",
        "✓".green().bold(),
        args.dir.display().to_string().bold(),
        args.output.display()
    );
    println!("  Scope: {}  Depth: {}", path.to_string().cyan(), depth);
    println!("  Nodes: {}", count_nodes(&tree, &path)?);
    Ok(())
}

fn cmd_show(args: ShowArgs, config: &CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let path = parse_path(&args.path)?;
    let mut input = open(&args.file)?;
    let (tree, frontier) = tree_reader(config)
        .read_tree_frontier(&mut input)
        .with_context(|| format!("reading tree stream {}", args.file.display()))?;
    let elided: BTreeSet<&TreePath> = frontier.elided.iter().collect();

    let mut rows = Vec::new();
    tree.visit(&path, Depth::from(args.depth), &mut |node_path, data| {
        rows.push((node_path.clone(), data.cloned()));
        true
    })?;

    if format == OutputFormat::Json {
        let nodes: Vec<_> = rows
            .iter()
            .map(|(node_path, data)| {
                json!({
                    "path": node_path.to_string(),
                    "entry": data,
                    "elided": elided.contains(node_path),
                })
            })
            .collect();
        let doc = json!({
            "scope": frontier.scope.to_string(),
            "depth": frontier.depth.to_string(),
            "nodes": nodes,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let base = path.segment_count();
    for (node_path, data) in &rows {
        let indent = "  ".repeat(node_path.segment_count() - base);
        let name = node_path.last_segment().unwrap_or("/");
        let name = if data.is_none() { name.blue().bold() } else { name.normal() };
        let cut = if elided.contains(node_path) { " …".yellow().to_string() } else { String::new() };
        println!("{indent}{name}{cut}  {}", describe(data.as_ref()).dimmed());
    }
    if !frontier.is_whole() {
        println!(
            "\n{} subtrees cut off at depth {}",
            frontier.elided.len().to_string().yellow(),
            frontier.depth
        );
    }
    Ok(())
}

fn cmd_diff(args: DiffArgs, config: &CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let path = parse_path(&args.path)?;
    let old = read_tree(&args.old, config)?;
    let new = read_tree(&args.new, config)?;

    let scope = DiffScope::at(path.clone()).with_depth(Depth::from(args.depth));
    let mut comparison = old.compare_in(&new, &EqualityComparator, &scope)?;
    if args.reverse {
        comparison = comparison.as_reverse_comparison_tree(&EqualityComparator);
    }

    let mut changes = Vec::new();
    comparison.visit(&TreePath::root(), Depth::Unbounded, &mut |relative, node| {
        if let Some(node) = node.filter(|n| n.kind().is_change()) {
            changes.push((path.join(relative), node.clone()));
        }
        true
    })?;

    if format == OutputFormat::Json {
        let entries: Vec<_> = changes
            .iter()
            .map(|(node_path, node)| {
                json!({
                    "path": node_path.to_string(),
                    "kind": change_label(node.kind()),
                    "old": node.old_data(),
                    "new": node.new_data(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if changes.is_empty() {
        println!("No changes.");
        return Ok(());
    }
    for (node_path, node) in &changes {
        let line = node_path.to_string();
        match node.kind() {
            ChangeKind::Added => println!("{} {}", "+".green().bold(), line.green()),
            ChangeKind::Removed => println!("{} {}", "-".red().bold(), line.red()),
            _ => println!(
                "{} {}  {} → {}",
                "~".yellow().bold(),
                line.yellow(),
                describe(node.old_data()).dimmed(),
                describe(node.new_data())
            ),
        }
    }
    println!("\n{} changes", changes.len().to_string().bold());
    Ok(())
}

fn cmd_delta(args: DeltaArgs, config: &CliConfig) -> anyhow::Result<()> {
    let path = parse_path(&args.path)?;
    let base = read_tree(&args.base, config)?;
    let new = read_tree(&args.new, config)?;

    let mut out = create(&args.output)?;
    tree_writer().write_delta(
        &base,
        &new,
        &path,
        Depth::from(args.depth),
        &mut out,
        &EqualityComparator,
    )?;
    out.flush()?;
    println!(
        "{} Delta {} → {} written to {}",
        "✓".green().bold(),
        args.base.display(),
        args.new.display(),
        args.output.display().to_string().bold()
    );
    Ok(())
}

fn cmd_apply(args: ApplyArgs, config: &CliConfig) -> anyhow::Result<()> {
    let base = read_tree(&args.base, config)?;
    let mut input = open(&args.delta)?;
    let applied = tree_reader(config)
        .read_delta(&base, &mut input)
        .with_context(|| format!("reading delta stream {}", args.delta.display()))?;

    let root = TreePath::root();
    let mut out = create(&args.output)?;
    tree_writer().write_tree(&applied, &root, Depth::Unbounded, &mut out)?;
    out.flush()?;
    println!(
        "{} Applied {} to {}: {} nodes written to {}",
        "✓".green().bold(),
        args.delta.display(),
        args.base.display(),
        count_nodes(&applied, &root)?,
        args.output.display().to_string().bold()
    );
    Ok(())
}

fn cmd_chain(args: ChainArgs, config: &CliConfig) -> anyhow::Result<()> {
    let mut lineage_config = config.lineage.clone();
    if let Some(threshold) = args.reroot_threshold {
        lineage_config.reroot_threshold = threshold;
    }

    let Some((first, rest)) = args.snapshots.split_first() else {
        anyhow::bail!("no snapshots given");
    };
    let base = read_tree(first, config)?;
    let mut lineage = Lineage::from_snapshot(&base, lineage_config)?;
    let mut snapshots = vec![base];
    for file in rest {
        let next = read_tree(file, config)?;
        let edits = replay(lineage.tip_mut(), &next)?;
        let snapshot = lineage.commit()?;
        println!(
            "  {} {} edits, chain length {}",
            file.display().to_string().cyan(),
            edits,
            snapshot.chain_len()
        );
        snapshots.push(snapshot);
    }

    // A reroot starts a new lineage; older snapshots cannot join the chain.
    let newest = snapshots[snapshots.len() - 1].clone();
    let before = snapshots.len();
    snapshots.retain(|s| s.ptr_eq(&newest) || newest.descends_from(s));
    if snapshots.len() < before {
        println!(
            "{} rerooted: {} older snapshots left out of the chain",
            "!".yellow().bold(),
            before - snapshots.len()
        );
    }

    let mut out = create(&args.output)?;
    tree_writer().write_delta_chain(
        &snapshots,
        &TreePath::root(),
        Depth::Unbounded,
        &mut out,
        &EqualityComparator,
    )?;
    out.flush()?;
    println!(
        "{} Chain of {} snapshots ({} commits) written to {}",
        "✓".green().bold(),
        snapshots.len(),
        lineage.commits(),
        args.output.display().to_string().bold()
    );
    Ok(())
}

fn cmd_inspect(args: InspectArgs, config: &CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut input = open(&args.file)?;
    let chain = tree_reader(config)
        .read_delta_chain(&mut input)
        .with_context(|| format!("reading chain stream {}", args.file.display()))?;
    let root = TreePath::root();

    let mut members = Vec::new();
    for (index, tree) in chain.iter().enumerate() {
        let changes = match index.checked_sub(1) {
            Some(previous) => count_changes(&chain[previous], tree)?,
            None => 0,
        };
        members.push((index, tree.chain_len(), tree.overlay().node_count(), count_nodes(tree, &root)?, changes));
    }

    let rerooted = match (args.reroot, chain.last()) {
        (true, Some(newest)) => newest.reroot()?,
        _ => Vec::new(),
    };

    if format == OutputFormat::Json {
        let members: Vec<_> = members
            .iter()
            .map(|&(index, layers, stored, nodes, changes)| {
                json!({
                    "index": index,
                    "layers": layers,
                    "stored_nodes": stored,
                    "nodes": nodes,
                    "changes": changes,
                })
            })
            .collect();
        let rerooted: Vec<_> = rerooted
            .iter()
            .map(|tree| json!({ "layers": tree.chain_len(), "stored_nodes": tree.overlay().node_count() }))
            .collect();
        let doc = json!({ "members": members, "rerooted": rerooted });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Delta chain {} ({} trees)", args.file.display().to_string().bold(), chain.len());
    for (index, layers, stored, nodes, changes) in members {
        let label = if index == 0 { "base".green() } else { "delta".cyan() };
        println!(
            "  #{index:<3} {label:<6} layers {layers:<3} stored {stored:<6} nodes {nodes:<6} changes {changes}"
        );
    }
    if !rerooted.is_empty() {
        println!("\nRerooted at newest:");
        for (index, tree) in rerooted.iter().enumerate() {
            let label = if tree.is_complete() { "base".green() } else { "delta".cyan() };
            println!(
                "  #{index:<3} {label:<6} layers {:<3} stored {}",
                tree.chain_len(),
                tree.overlay().node_count()
            );
        }
    }
    Ok(())
}

fn count_changes(old: &LayeredTree<FileEntry>, new: &LayeredTree<FileEntry>) -> anyhow::Result<usize> {
    let comparison = old.compare_with(new, &EqualityComparator)?;
    let mut changes = 0;
    comparison.visit(&TreePath::root(), Depth::Unbounded, &mut |_, node| {
        if node.is_some_and(|n| n.kind().is_change()) {
            changes += 1;
        }
        true
    })?;
    Ok(changes)
}
