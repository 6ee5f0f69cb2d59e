use pivotal::{ComparisonOp, OptimizationDirection, Problem, SolverConfig};

const USAGE: &str = "\
Solve a small transportation problem and print the result.

USAGE:
    solve_demo --help
    solve_demo [CONFIG_FILE]

CONFIG_FILE is a JSON file with solver settings, for example
{\"algorithm\": \"PRIMAL\", \"dual_ratio_test\": \"TRADITIONAL\"}.
Missing settings take their default values.

Output is the objective value, the shipped amounts, solve statistics and the
optimal basis as JSON.

Set RUST_LOG environment variable (e.g. to debug) to enable logging to stderr.
";

const SUPPLY: [f64; 3] = [20.0, 30.0, 25.0];
const DEMAND: [f64; 4] = [10.0, 25.0, 15.0, 20.0];
const COST: [[f64; 4]; 3] = [
    [8.0, 6.0, 10.0, 9.0],
    [9.0, 12.0, 13.0, 7.0],
    [14.0, 9.0, 16.0, 5.0],
];

fn main() {
    env_logger::init();

    let args = std::env::args().collect::<Vec<_>>();
    let config = match args.len() {
        1 => SolverConfig::default(),
        2 if args[1] == "--help" => {
            print!("{}", USAGE);
            return;
        }
        2 => {
            let file = std::fs::File::open(&args[1]).unwrap();
            serde_json::from_reader(std::io::BufReader::new(file)).unwrap()
        }
        _ => {
            print!("{}", USAGE);
            std::process::exit(1);
        }
    };

    let mut problem = Problem::new(OptimizationDirection::Minimize);
    let mut ship = vec![];
    for (s, costs) in COST.iter().enumerate() {
        let row = costs
            .iter()
            .enumerate()
            .map(|(d, &cost)| {
                problem.add_var_named(format!("ship_{}_{}", s, d), cost, (0.0, f64::INFINITY))
            })
            .collect::<Vec<_>>();
        ship.push(row);
    }
    for (s, &supply) in SUPPLY.iter().enumerate() {
        problem.add_constraint(ship[s].iter().map(|&v| (v, 1.0)), ComparisonOp::Le, supply);
    }
    for (d, &demand) in DEMAND.iter().enumerate() {
        problem.add_constraint(ship.iter().map(|row| (row[d], 1.0)), ComparisonOp::Ge, demand);
    }

    let solution = match problem.solve_with(config) {
        Ok(solution) => solution,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    };

    println!("objective value: {}", solution.objective());
    for (s, row) in ship.iter().enumerate() {
        let amounts = row.iter().map(|&v| solution[v]).collect::<Vec<_>>();
        println!("from {}: {:?}", s, amounts);
    }
    println!(
        "statistics: {}",
        serde_json::to_string(&solution.statistics()).unwrap()
    );
    println!(
        "basis: {}",
        serde_json::to_string_pretty(&solution.basis_snapshot()).unwrap()
    );
}
