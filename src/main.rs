use clap::{Arg, Command};
use pedsim::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use pedsim::scenario::ScenarioConfig;
use pedsim::simulation::SimulationEngine;
use std::error::Error;
use std::str::FromStr;
use tracing::error;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("pedsim")
        .version("0.1.0")
        .about("歩行者再生・遠隔操作ロボットシミュレータ")
        .long_about("記録済みの歩行者軌跡を再生しながら、外部コントローラから\n\
                     遠隔操作されるロボットを共通クロックで動かします。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .help("ログ出力先 (console, file, both)。シナリオの設定を上書き")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("no-protocol")
                .long("no-protocol")
                .action(clap::ArgAction::SetTrue)
                .help("コントローラ通信を無効化（ロボットは静止したまま）")
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    let Some(scenario_path) = matches.get_one::<String>("scenario") else {
        show_default_help();
        return;
    };

    let mut scenario = match ScenarioConfig::from_file(scenario_path) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };

    if matches.get_flag("info") {
        scenario.print_summary();
        return;
    }

    if matches.get_flag("no-protocol") {
        scenario.protocol.enabled = false;
    }

    // ログ設定: シナリオ → CLI 引数の順に上書き
    let mut log_config = LogConfig::from(&scenario.logging);
    if let Some(output) = matches.get_one::<String>("log-output") {
        match LogOutput::from_str(output) {
            Ok(output) => log_config.output = output,
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        log_config.level = parse_log_level(level);
    }
    log_config.level = level_for_verbosity(log_config.level, verbose_level);

    let _guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = execute_scenario(scenario, verbose_level) {
        error!("シミュレーションエラー: {}", e);
        eprintln!("エラー: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  原因: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), pedsim::SimError> {
    if verbose_level > 0 {
        scenario.print_summary();
        println!();
    }

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;

    let summary = simulation.run()?;
    println!(
        "エピソード \"{}\" 終了: {} ({:.2}秒, コマンド {} 件実行)",
        summary.episode_name, summary.robot_cause, summary.sim_time, summary.commands_executed
    );

    Ok(())
}

/// デフォルトヘルプを表示
fn show_default_help() {
    println!("使用方法:");
    println!("  pedsim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>     シナリオファイルを指定して実行");
    println!("  -i, --info                シナリオ情報のみ表示");
    println!("  -v, --verbose             詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-output <OUTPUT> ログ出力先 (console, file, both)");
    println!("      --log-level <LEVEL>   ログレベル");
    println!("      --no-protocol         コントローラ通信を無効化");
    println!("  -h, --help                このヘルプを表示");
    println!();
    println!("例:");
    println!("  pedsim -s scenarios/corridor.yaml");
    println!("  pedsim -s scenarios/corridor.yaml -i");
    println!("  pedsim -s scenarios/corridor.yaml --no-protocol -vv");
}
