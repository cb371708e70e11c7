use assert_cmd::Command;
use predicates::prelude::*;

fn pldm() -> Command {
    Command::cargo_bin("pldm").unwrap()
}

#[test]
fn test_cli_help() {
    pldm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Planning with Latent Dynamics Models"));
}

#[test]
fn test_cli_list() {
    pldm()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Available environments:"))
        .stdout(predicate::str::contains("wall"))
        .stdout(predicate::str::contains("point_maze_umaze"));
}

#[test]
fn test_cli_unknown_env() {
    pldm().args(["demo", "cartpole"]).assert().failure();
}

#[test]
fn test_cli_demo() {
    pldm()
        .args(["demo", "wall", "--steps", "3", "--every", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Step 0"))
        .stdout(predicate::str::contains("A"));
}

#[test]
fn test_cli_generate() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("data").join("wall.json");

    pldm()
        .arg("generate")
        .arg("wall")
        .arg("--out")
        .arg(&out)
        .args(["--episodes", "4", "--episode-len", "10", "--seed", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 4 trajectories (40 transitions)"));

    let raw = std::fs::read_to_string(&out).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["metadata"]["env_name"], "wall");
}

#[test]
fn test_cli_eval_random() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.json");

    pldm()
        .args(["eval", "point_maze_umaze", "--method", "random", "--episodes", "2"])
        .arg("--report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting evaluation"))
        .stdout(predicate::str::contains("random: success rate"));

    let raw = std::fs::read_to_string(&report).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["episodes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_cli_eval_learned_needs_checkpoint() {
    pldm()
        .args(["eval", "wall", "--method", "pldm", "--episodes", "1"])
        .assert()
        .failure();
}

#[test]
fn test_cli_config() {
    let output = pldm().arg("config").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["planner"]["kind"], "mppi");
    assert!(json["train"]["epochs"].as_u64().unwrap() > 0);
}

#[test]
#[cfg(not(feature = "torch"))]
fn test_cli_train_requires_torch() {
    let dir = tempfile::tempdir().unwrap();
    pldm()
        .arg("train")
        .arg(dir.path().join("missing.json"))
        .arg("--out")
        .arg(dir.path().join("run"))
        .assert()
        .failure();
}

#[test]
#[cfg(feature = "torch")]
fn test_cli_train_then_eval() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("wall.json");
    let run = dir.path().join("run");

    pldm()
        .arg("generate")
        .arg("wall")
        .arg("--out")
        .arg(&data)
        .args(["--episodes", "16", "--episode-len", "12"])
        .assert()
        .success();

    // Very short run
    pldm()
        .env("PLDM_STEPS_PER_EPOCH", "2")
        .env("PLDM_BATCH_SIZE", "8")
        .env("PLDM_SEQ_LEN", "4")
        .arg("train")
        .arg(&data)
        .arg("--out")
        .arg(&run)
        .args(["--epochs", "1"])
        .assert()
        .success();
    assert!(run.join("checkpoint_final.bin").exists());

    pldm()
        .args(["eval", "wall", "--method", "pldm", "--episodes", "1"])
        .arg("--checkpoint")
        .arg(&run)
        .assert()
        .success()
        .stdout(predicate::str::contains("success rate"));

    // A checkpoint whose config no longer parses must not fall back to defaults
    for entry in std::fs::read_dir(&run).unwrap() {
        let path = entry.unwrap().path();
        let is_state = path.extension().is_some_and(|e| e == "json")
            && path.file_name().is_some_and(|n| n != "config.json");
        if is_state {
            let raw = std::fs::read_to_string(&path).unwrap();
            let mut state: serde_json::Value = serde_json::from_str(&raw).unwrap();
            state["config"] = serde_json::json!({ "planner": 5 });
            std::fs::write(&path, state.to_string()).unwrap();
        }
    }
    pldm()
        .args(["eval", "wall", "--method", "pldm", "--episodes", "1"])
        .arg("--checkpoint")
        .arg(&run)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config in checkpoint"));
}
