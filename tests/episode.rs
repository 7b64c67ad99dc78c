use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use pedsim::models::TerminationCause;
use pedsim::models::ROBOT_NAME;
use pedsim::scenario::ScenarioConfig;
use pedsim::simulation::SimulationEngine;
use serde_json::Value;

/// テスト用のスクリプト化されたコントローラ
struct Controller {
    inbox: TcpListener,
    sim_addr: SocketAddr,
}

impl Controller {
    fn send(&self, payload: &str) -> bool {
        match TcpStream::connect(self.sim_addr) {
            Ok(mut stream) => stream.write_all(payload.as_bytes()).is_ok(),
            Err(_) => false,
        }
    }

    fn receive(&self, timeout: Duration) -> Option<Value> {
        let deadline = Instant::now() + timeout;
        self.inbox.set_nonblocking(true).ok()?;
        loop {
            match self.inbox.accept() {
                Ok((mut stream, _)) => {
                    stream.set_nonblocking(false).ok()?;
                    let mut body = String::new();
                    stream.read_to_string(&mut body).ok()?;
                    return serde_json::from_str(&body).ok();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Err(_) => return None,
            }
        }
    }

    /// 目標へ直進させ、終了メッセージを受け取るまで続ける
    fn drive(self) -> (Option<Value>, Option<Value>) {
        let metadata = self.receive(Duration::from_secs(5));
        assert!(self.send("ready"));

        let deadline = Instant::now() + Duration::from_secs(30);
        let mut last = None;
        while Instant::now() < deadline {
            if !self.send("sense") {
                while let Some(message) = self.receive(Duration::from_millis(200)) {
                    last = Some(message);
                }
                break;
            }
            let Some(world) = self.receive(Duration::from_secs(2)) else {
                continue;
            };
            let robot_on = world["robot_on"].as_bool().unwrap_or(false);
            last = Some(world);
            if !robot_on {
                break;
            }
            self.send(r#"{"v_cmds": [1.0, 1.0], "w_cmds": [0.0, 0.0]}"#);
        }
        (metadata, last)
    }
}

fn write_dataset(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("pedsim_episode_{}_{}.csv", tag, std::process::id()));
    let frames: Vec<String> = (0..20).map(|f| f.to_string()).collect();
    let ids = vec!["1".to_string(); 20];
    let ys = vec!["8.0".to_string(); 20];
    let xs: Vec<String> = (0..20).map(|f| format!("{:.2}", f as f64 * 0.1)).collect();
    let body = [frames, ids, ys, xs]
        .iter()
        .map(|row| row.join(","))
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&path, body).unwrap();
    path
}

fn scenario(dataset: &PathBuf, port_send: u16, horizon: f64, ready_timeout_ms: u64) -> ScenarioConfig {
    let yaml = format!(
        r#"
meta:
  version: "1.0"
  name: loopback
sim:
  dt_s: 0.1
  episode_horizon_s: {horizon}
robot:
  start: [0.0, 0.0, 0.0]
  goal: [2.0, 0.0, 0.0]
  goal_margin_m: 0.3
pedestrians:
  ped_range: [0, -1]
  datasets:
    - name: line
      file: "{file}"
      fps: 10.0
protocol:
  host: 127.0.0.1
  port_send: {port_send}
  port_recv: 0
  ready_timeout_ms: {ready_timeout_ms}
  command_wait_ms: 50
  max_block_polls: 20
"#,
        file = dataset.display(),
    );
    ScenarioConfig::from_yaml_str(&yaml).unwrap()
}

#[test]
fn test_episode_with_scripted_controller() {
    let dataset = write_dataset("scripted");
    let inbox = TcpListener::bind("127.0.0.1:0").unwrap();
    let port_send = inbox.local_addr().unwrap().port();

    let mut engine = SimulationEngine::new(scenario(&dataset, port_send, 30.0, 10_000), 0);
    engine.initialize().unwrap();
    let sim_addr = engine.listener_addr().unwrap();

    let controller = thread::spawn(move || Controller { inbox, sim_addr }.drive());
    let summary = engine.run().unwrap();
    let (metadata, last) = controller.join().unwrap();
    std::fs::remove_file(&dataset).ok();

    assert_eq!(summary.robot_cause, TerminationCause::Success);
    assert!(summary.commands_executed >= 17);
    assert!(summary.commands_received >= summary.commands_executed);
    assert_eq!(summary.pedestrians, 1);
    assert_eq!(summary.pedestrians_completed, 1);
    assert_eq!(summary.robot_collisions, 0);

    let metadata = metadata.expect("エピソード情報を受信していない");
    assert_eq!(metadata["episode_name"], "loopback");
    assert_eq!(metadata["robots"][ROBOT_NAME]["goal_config"][0], 2.0);
    assert!(metadata["pedestrians"].get("prerec_0000").is_some());

    let last = last.expect("終了メッセージを受信していない");
    assert_eq!(last["robot_on"], false);
    assert_eq!(last["termination_cause"], "Success");
}

#[test]
fn test_episode_without_controller_times_out() {
    let dataset = write_dataset("absent");
    // 誰も待ち受けていないポート
    let port_send = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

    let mut engine = SimulationEngine::new(scenario(&dataset, port_send, 1.0, 200), 0);
    engine.initialize().unwrap();
    let started = Instant::now();
    let summary = engine.run().unwrap();
    std::fs::remove_file(&dataset).ok();

    assert_eq!(summary.robot_cause, TerminationCause::Timeout);
    assert_eq!(summary.commands_executed, 0);
    assert!(engine.context().channel().peer_gone());
    assert!(started.elapsed() < Duration::from_secs(10));
}
