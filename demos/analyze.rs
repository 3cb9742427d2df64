use std::rc::Rc;

use clap::Parser;

use cpa_rs::cfa::{BinaryOp, Cfa, CfaBuilder, EdgeKind, Expr, NodeId};
use cpa_rs::cpa::algorithm::CpaAlgorithm;
use cpa_rs::cpa::composite::{self, CompositeCpa, CompositeOptions};
use cpa_rs::cpa::erase;
use cpa_rs::cpa::explicit::ExplicitCpa;
use cpa_rs::cpa::location::LocationCpa;
use cpa_rs::cpa::sign::{SignCpa, SignMerge};
use cpa_rs::formula::{FormulaManager, FormulaManagerOptions};
use cpa_rs::options::FromProperties;
use cpa_rs::path_formula::PathFormulaManager;
use cpa_rs::predicate::{
    AbstractionManager, AbstractionOptions, PredicateAbstractionManager, PredicateCpa, PredicateCpaOptions,
    PredicatePrecision,
};
use cpa_rs::region::{BddRegionManager, RegionCreator};
use cpa_rs::solver::{Solver, SolverOptions};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Loop bound of the analyzed program.
    #[arg(value_name = "INT", default_value = "10")]
    bound: i64,

    /// Use Cartesian instead of Boolean abstraction.
    #[clap(long)]
    cartesian: bool,

    /// Track explicit values as well.
    #[clap(long)]
    explicit: bool,

    /// Partition the reached set by location.
    #[clap(long)]
    specialized: bool,

    /// BDD cache size (in bits).
    #[clap(long, value_name = "INT", default_value = "16")]
    cache_bits: usize,

    /// Analysis options, e.g. `-D cpa.predicate.blk=everyEdge`.
    #[clap(short = 'D', value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

/// ```text
/// int inc(int a) { return a + 1; }
///
/// i = 0;
/// while (i < bound) i = inc(i);
/// if (i < 0) ERROR;
/// ```
fn program(bound: i64) -> (Cfa, NodeId) {
    let mut builder = CfaBuilder::new("main");
    let entry = builder.function("main");
    let head = builder.node();
    let call = builder.node();
    let inc = builder.function("inc");
    let inc_exit = builder.node();
    let check = builder.node();
    let error = builder.node();
    let done = builder.node();

    builder.assign(entry, head, "i", Expr::constant(0));
    builder.loop_head(head);
    builder.branch(head, call, check, Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::constant(bound)));
    builder.edge(
        call,
        inc,
        EdgeKind::FunctionCall {
            function: "inc".to_string(),
            arguments: vec![Expr::var("i")],
            parameters: vec!["a".to_string()],
            call_site: call,
        },
    );
    builder.edge(
        inc,
        inc_exit,
        EdgeKind::Return {
            function: "inc".to_string(),
            value: Some(Expr::binary(BinaryOp::Add, Expr::var("a"), Expr::constant(1))),
        },
    );
    builder.edge(
        inc_exit,
        head,
        EdgeKind::FunctionReturn {
            function: "inc".to_string(),
            call_site: call,
            assigned: Some(Expr::var("i")),
        },
    );
    builder.branch(check, error, done, Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::constant(0)));

    (builder.build(), error)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    let properties: Vec<(&str, &str)> = args
        .properties
        .iter()
        .filter_map(|p| p.split_once('='))
        .collect();

    let mut abstraction_options = AbstractionOptions::from_properties(properties.iter().copied())?;
    if args.cartesian {
        abstraction_options.cartesian_abstraction = true;
    }
    let predicate_options = PredicateCpaOptions::from_properties(properties.iter().copied())?;
    let mut composite_options = CompositeOptions::from_properties(properties.iter().copied())?;
    if args.specialized {
        composite_options.use_specialized_reached_set = true;
    }
    let solver_options = SolverOptions::from_properties(properties.iter().copied())?;
    let formula_options = FormulaManagerOptions::from_properties(properties.iter().copied())?;

    let (cfa, error) = program(args.bound);
    let cfa = Rc::new(cfa);

    let fmgr = Rc::new(FormulaManager::new(formula_options));
    let rmgr: Rc<dyn RegionCreator> = Rc::new(BddRegionManager::new(args.cache_bits));
    let amgr = Rc::new(AbstractionManager::new(rmgr, fmgr.clone()));
    let pfmgr = Rc::new(PathFormulaManager::new(fmgr.clone()));
    let solver = Rc::new(Solver::new(fmgr.clone(), solver_options));
    let pamgr = Rc::new(PredicateAbstractionManager::new(
        amgr.clone(),
        fmgr.clone(),
        pfmgr,
        solver.clone(),
        abstraction_options,
    ));

    let atom = fmgr.make_greater_than(fmgr.make_variable("i"), fmgr.make_number(-1));
    let precision = PredicatePrecision::global([amgr.make_predicate(&atom)]);

    let mut components = vec![
        erase(LocationCpa::new(cfa.clone())),
        erase(PredicateCpa::new(pamgr.clone(), cfa.clone(), predicate_options, precision)),
        erase(SignCpa::new(SignMerge::Join)),
    ];
    if args.explicit {
        components.push(erase(ExplicitCpa::new()));
    }
    let cpa = CompositeCpa::new(components, composite_options);

    let algorithm = CpaAlgorithm::new(&cpa, &cfa);
    let mut reached = algorithm.initial_reached_set(cpa.options().use_specialized_reached_set);
    let stats = algorithm.run(&mut reached)?;

    for node in 0..cfa.num_nodes() {
        for element in reached.at(NodeId(node)) {
            println!("{}", element);
        }
    }

    println!();
    println!("{}", stats);
    println!("Composite stop checks: {}", composite::num_operations());
    println!();
    println!("{}", pamgr.stats());
    println!("Solver queries: {}", solver.stats().total_queries());
    println!();
    if reached.at(error).is_empty() {
        println!("ERROR location is unreachable");
    } else {
        println!("ERROR location may be reachable");
    }

    Ok(())
}
