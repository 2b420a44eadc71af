use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let code = runtime.block_on(scenebatch_lib::run());
    drop(runtime);
    std::process::exit(code);
}
