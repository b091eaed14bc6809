use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

const SERVICE_UNIT: &str = "wifip2p.service";
const DAEMON_BIN: &str = "wifip2p-daemon";
/// CLI 安装后的名字
const CLI_BIN: &str = "wifip2p";

#[derive(Parser)]
#[command(name = "xtask", about = "wifip2p 开发任务")]
struct Cli {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// release 构建守护进程和 CLI
    Build,
    /// 前台运行守护进程
    Dev {
        /// wifip2p crate 的日志级别
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 安装二进制和 systemd 单元
    Install,
    /// 移除已安装的文件
    Uninstall,
    /// 给守护进程加 CAP_NET_ADMIN / CAP_NET_BIND_SERVICE
    SetupCaps,
    /// 生成发布包
    Dist,
    /// 运行测试
    Test {
        /// 包括需要真实 wpa_supplicant 的测试
        #[arg(long)]
        hardware: bool,
    },
    /// clippy + rustfmt 检查
    Lint,
    /// 覆盖率报告 (cargo-tarpaulin)
    Coverage,
    Clean,
}

fn workspace_root() -> Result<PathBuf> {
    let manifest = std::env::var("CARGO_MANIFEST_DIR").map(PathBuf::from);
    match manifest.ok().and_then(|p| p.parent().map(PathBuf::from)) {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("cannot determine workspace root"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.task {
        Task::Build => build(&sh),
        Task::Dev { log_level } => dev(&sh, &log_level),
        Task::Install => install(&sh),
        Task::Uninstall => uninstall(&sh),
        Task::SetupCaps => setup_caps(&sh),
        Task::Dist => dist(&sh),
        Task::Test { hardware } => test(&sh, hardware),
        Task::Lint => lint(&sh),
        Task::Coverage => coverage(&sh),
        Task::Clean => clean(&sh),
    }
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 cargo build --release");
    cmd!(sh, "cargo build --release -p wifip2p-daemon -p wifip2p-cli").run()?;
    Ok(())
}

fn dev(sh: &Shell, log_level: &str) -> Result<()> {
    let filter = format!("info,wifip2p_core={log_level},wifip2p_daemon={log_level}");
    println!("🚀 RUST_LOG={filter}");
    let _env = sh.push_env("RUST_LOG", filter);
    cmd!(sh, "cargo run -p wifip2p-daemon").run()?;
    Ok(())
}

/// (构建产物, 安装位置)
fn installed_files() -> [(String, String); 3] {
    [
        (
            format!("target/release/{DAEMON_BIN}"),
            format!("/usr/local/bin/{DAEMON_BIN}"),
        ),
        (
            "target/release/wifip2p-cli".to_string(),
            format!("/usr/local/bin/{CLI_BIN}"),
        ),
        (
            format!("assets/{SERVICE_UNIT}"),
            format!("/etc/systemd/system/{SERVICE_UNIT}"),
        ),
    ]
}

fn install(sh: &Shell) -> Result<()> {
    build(sh)?;

    // 运行中的守护进程会占用二进制文件
    let _ = cmd!(sh, "sudo systemctl stop {SERVICE_UNIT}").quiet().run();

    for (from, to) in installed_files() {
        println!("📋 {from} -> {to}");
        cmd!(sh, "sudo install -D {from} {to}").run()?;
    }
    cmd!(sh, "sudo systemctl daemon-reload").run()?;
    cmd!(sh, "sudo systemctl enable --now {SERVICE_UNIT}").run()?;

    println!("✅ 已安装，查看状态: systemctl status {SERVICE_UNIT}");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    let _ = cmd!(sh, "sudo systemctl disable --now {SERVICE_UNIT}").run();
    for (_, to) in installed_files() {
        let _ = cmd!(sh, "sudo rm -f {to}").run();
    }
    cmd!(sh, "sudo systemctl daemon-reload").run()?;
    println!("✅ 已卸载");
    Ok(())
}

fn setup_caps(sh: &Shell) -> Result<()> {
    build(sh)?;
    // 配置组接口地址需要 NET_ADMIN，dnsmasq 监听 67 端口需要 NET_BIND_SERVICE
    let bin = format!("target/release/{DAEMON_BIN}");
    cmd!(sh, "sudo setcap cap_net_admin,cap_net_bind_service+eip {bin}").run()?;
    println!("✅ capabilities 已设置");
    println!("   访问 wpa_supplicant 控制套接字仍需 netdev 组权限");
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    build(sh)?;

    let name = format!("wifip2p-{}-linux-x86_64", env!("CARGO_PKG_VERSION"));
    let staging = format!("dist/{name}");
    sh.create_dir(&staging)?;
    for (from, to) in installed_files() {
        let file_name = to.rsplit('/').next().unwrap_or(&to);
        sh.copy_file(&from, format!("{staging}/{file_name}"))?;
    }

    sh.change_dir("dist");
    cmd!(sh, "tar -czf {name}.tar.gz {name}").run()?;
    println!("📦 dist/{name}.tar.gz");
    Ok(())
}

fn test(sh: &Shell, hardware: bool) -> Result<()> {
    let extra: &[&str] = if hardware { &["--include-ignored"] } else { &[] };
    cmd!(sh, "cargo test --workspace -- {extra...}").run()?;
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo fmt --all --check").run()?;
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    if cmd!(sh, "cargo tarpaulin --version").quiet().run().is_err() {
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }
    cmd!(
        sh,
        "cargo tarpaulin --packages wifip2p-core --out Html --output-dir target/coverage"
    )
    .run()?;
    println!("📊 target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    cmd!(sh, "cargo clean").run()?;
    sh.remove_path("dist")?;
    Ok(())
}
