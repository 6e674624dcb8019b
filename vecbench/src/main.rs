fn main() -> anyhow::Result<()> {
    vecbench_cli::run()
}
