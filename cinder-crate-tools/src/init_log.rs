use std::io::Write;

use env_logger::fmt::Formatter;

/// 初始化全局 logger，默认级别为 Info
///
/// 可以通过 `RUST_LOG` 环境变量覆盖默认级别。
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

pub fn init_log_with_level(level: log::LevelFilter) {
    builder(level).init();
}

/// 测试中使用：输出交给 test harness 捕获，重复调用不会 panic
pub fn init_test_log() {
    let _ = builder(log::LevelFilter::Debug).is_test(true).try_init();
}

fn builder(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.format(format_record).filter(None, level).parse_default_env();
    builder
}

fn format_record(buf: &mut Formatter, record: &log::Record) -> std::io::Result<()> {
    let level_style = match record.level() {
        log::Level::Error => {
            buf.default_level_style(log::Level::Error).fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)))
        }
        log::Level::Warn => buf
            .default_level_style(log::Level::Warn)
            .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        log::Level::Info => buf
            .default_level_style(log::Level::Info)
            .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        level => buf.default_level_style(level),
    };
    let grey_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

    let line = record.line().unwrap_or(!0);
    // 兼容 windows 和 unix 的路径分隔符
    let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
    let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
    let level = record.level();
    let module = record.module_path().unwrap_or("");

    writeln!(
        buf,
        "{level_style}[{time}] {level}: {}{level_style:#}\n\t {grey_style}In {module} At {file}:{line}{grey_style:#}",
        record.args()
    )
}
