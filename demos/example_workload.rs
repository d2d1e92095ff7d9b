extern crate env_logger;
#[macro_use]
extern crate log;
extern crate rs_lockcoupling;

use rs_lockcoupling::lock_coupling_list::LockCouplingList;
use rs_lockcoupling::workload::{self, WorkloadConf};
use std::env;
use std::process;
use std::sync::Arc;
use std::time::SystemTime;

fn parse_arg(args: &[String], idx: usize, name: &str) -> usize {
    match args[idx].parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("invalid {}: {}", name, args[idx]);
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        println!("Usage: example_workload no_of_threads inserted_vals val_bound");
        return;
    }
    let conf = WorkloadConf {
        actor_count: parse_arg(&args, 1, "no_of_threads"),
        exp_count: parse_arg(&args, 2, "inserted_vals"),
        val_bound: parse_arg(&args, 3, "val_bound") as i64,
        verbose: true,
        join_interval_ms: 60_000,
        ..WorkloadConf::default()
    };
    info!("{:?}", conf);

    let list = Arc::new(LockCouplingList::new());
    let start = SystemTime::now();
    let ret = workload::run_workload(&list, &conf);
    let end = SystemTime::now();
    let cost = {
        let t = end.duration_since(start).unwrap();
        t.subsec_millis() as u64 + t.as_secs() * 1000
    };
    match ret {
        Ok(report) => {
            info!("{:?}", report.stats);
            println!(
                "ops {} remaining keys {} time cost {} ms",
                report.stats.total_ops(),
                list.len(),
                cost
            );
        }
        Err(status) => {
            println!("workload fail, status={} time cost {} ms", status, cost);
            process::exit(1);
        }
    }
}
