//! The main entrypoint for boom, which just performs global initialization
//! and then calls out into the library.

fn run() -> anyhow::Result<()> {
    boom_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    boom_utils::run_main(run)
}
