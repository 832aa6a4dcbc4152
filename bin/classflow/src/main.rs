use classflow::jvm::class_file::ClassFile;
use classflow::jvm::code::{ClassCode, MethodCode};
use classflow::jvm::Error;

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::init();

    let matches = Command::new("JVM bytecode inspector")
        .version("0.1.0")
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Print decoded instructions, basic blocks, and dependency trees of a class")
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("NAME")
                .help("Only inspect methods with this name"),
        )
        .arg(
            Arg::new("blocks")
                .long("blocks")
                .action(ArgAction::SetTrue)
                .help("Print the basic blocks of each method"),
        )
        .arg(
            Arg::new("graph")
                .long("graph")
                .action(ArgAction::SetTrue)
                .help("Print the control flow graph and its cyclomatic complexity"),
        )
        .arg(
            Arg::new("tree")
                .long("tree")
                .action(ArgAction::SetTrue)
                .help("Print the stack dependency trees of each basic block"),
        )
        .arg(
            Arg::new("find")
                .long("find")
                .value_name("MNEMONIC")
                .help("List the offsets of instructions with this mnemonic (eg. `invokestatic`)"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class file to inspect")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .index(1),
        )
        .get_matches();

    if let Err(err) = run(&matches) {
        log::error!("{}", err);
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    let path = matches
        .get_one::<PathBuf>("INPUT")
        .ok_or_else(|| Error::MalformedClass(String::from("missing input class")))?;
    log::info!("Reading '{}'", path.display());
    let class = ClassFile::load_from_path(path)?;
    let class_name = class.class_name().unwrap_or("<unnamed>");
    println!("class {} ({} methods)", class_name, class.methods.len());

    let only_method = matches.get_one::<String>("method");
    let classes = ClassCode::new(&class);
    let mut inspected = 0;
    for index in 0..classes.len() {
        let name = class.methods[index].name(&class.constants).unwrap_or("<unnamed>");
        if only_method.map_or(false, |only| only != name) {
            continue;
        }
        match classes.method(index)? {
            Some(method) => {
                inspect(method, matches)?;
                inspected += 1;
            }
            None => log::debug!("Skipping '{}' (no code)", name),
        }
    }

    if inspected == 0 {
        if let Some(name) = only_method {
            log::warn!("No method named '{}' with code in {}", name, class_name);
        }
    }
    Ok(())
}

fn inspect(method: &MethodCode, matches: &ArgMatches) -> Result<(), Error> {
    println!();
    println!(
        "{}{} (max stack {}, max locals {})",
        method.name(),
        method.descriptor(),
        method.max_stack(),
        method.max_locals()
    );

    if let Some(mnemonic) = matches.get_one::<String>("find") {
        let offsets: Vec<String> = method
            .instructions()
            .matching(|instruction| instruction.opcode.mnemonic() == mnemonic.as_str())
            .map(|(_, instruction)| instruction.offset.to_string())
            .collect();
        println!("  {}: [{}]", mnemonic, offsets.join(", "));
        return Ok(());
    }

    print!("{}", method.instructions());
    for handler in method.exception_table() {
        println!(
            "  handler {}..{} -> {}",
            handler.start_pc.0, handler.end_pc.0, handler.handler_pc.0
        );
    }

    if matches.get_flag("blocks") {
        println!("blocks:");
        print!("{}", method.blocks()?);
    }

    if matches.get_flag("graph") {
        let graph = method.graph()?;
        println!("graph:");
        print!("{}", graph);
        println!(
            "  cyclomatic complexity {} (linear {})",
            graph.cyclomatic_complexity(),
            graph.linear_complexity()
        );
    }

    if matches.get_flag("tree") {
        let blocks = method.blocks()?;
        for (id, block) in blocks.iter() {
            println!("tree {}:", block.label);
            match method.block_tree(id) {
                Ok(tree) => print!("{}", tree),
                Err(err) => println!("  {}", err),
            }
        }
    }

    Ok(())
}
