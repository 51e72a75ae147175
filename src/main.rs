use jvm_unwind::jvm::class_graph::{ClassGraph, ClassGraphArenas};
use jvm_unwind::runtime::arch::{architecture_by_name, ARCHITECTURE_NAMES};
use jvm_unwind::runtime::{Error, Runtime, Settings};

use clap::{Arg, ArgAction, Command};
use std::process;

mod scenarios;

use scenarios::{Scenario, SCENARIOS};

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("JVM exception unwinding demo")
        .version(clap::crate_version!())
        .about("Lay out compiled frames on a simulated stack and watch exceptions propagate")
        .arg(
            Arg::new("arch")
                .long("arch")
                .value_name("ARCH")
                .value_parser(ARCHITECTURE_NAMES)
                .default_value(ARCHITECTURE_NAMES[0])
                .help("Frame layout to simulate"),
        )
        .arg(
            Arg::new("scenario")
                .long("scenario")
                .value_name("NAME")
                .help("Run only this scenario (default: all of them)"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the available scenarios"),
        )
        .get_matches();

    if matches.get_flag("list") {
        for scenario in &SCENARIOS {
            println!("{:<20}{}", scenario.name, scenario.description);
        }
        return Ok(());
    }

    let arch = matches
        .get_one::<String>("arch")
        .expect("architecture has a default");
    let selected: Vec<&Scenario> = match matches.get_one::<String>("scenario") {
        Some(name) => match scenarios::find(name) {
            Some(scenario) => vec![scenario],
            None => {
                log::error!("Unknown scenario '{}' (try --list)", name);
                process::exit(2);
            }
        },
        None => SCENARIOS.iter().collect(),
    };

    let mut status = 0;
    for scenario in selected {
        log::info!("Running scenario '{}' on {}", scenario.name, arch);
        println!("== {} ==", scenario.name);

        let mut settings = Settings::new();
        settings.architecture = architecture_by_name(arch).expect("validated by clap");

        let class_graph_arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&class_graph_arenas);
        let java = class_graph.insert_java_library_types()?;
        let runtime = Runtime::new(&class_graph, settings);

        let mut thread = runtime.attach_thread("main");
        let exit_code = runtime.run_main(&mut thread, |runtime, thread| {
            (scenario.run)(runtime, &java, thread)
        })?;
        runtime.detach_thread(thread)?;

        println!("(exit status {})", exit_code);
        status = status.max(exit_code);
    }

    process::exit(status)
}
