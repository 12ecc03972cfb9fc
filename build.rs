// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("chisel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build minimal root filesystems from slices of Debian packages")
        .subcommand(
            Command::new("cut")
                .about("Cut a tree with selected slices")
                .arg(Arg::new("release").long("release").value_name("dir"))
                .arg(Arg::new("root").long("root").value_name("dir").required(true))
                .arg(Arg::new("arch").long("arch").value_name("arch"))
                .arg(Arg::new("slices").value_name("slice names").num_args(1..).required(true)),
        )
        .subcommand(
            Command::new("contents")
                .about("List the paths contained in a deb file")
                .arg(Arg::new("deb").value_name("file").required(true)),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    fs::write(man_dir.join("chisel.1"), buffer)?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
