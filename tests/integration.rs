use std::{env, fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[landscape]\n"
        + "rows = 16\n"
        + "cols = 16\n"
        + "cell_length = 30.0\n"
        + "active_fraction = 1.0\n"
        + "n_ecoregions = 2\n"
        + "seed = 42\n"
        + "\n"
        + "[output]\n"
        + "steps_per_save = 1\n"
        + "saves_per_file = 8\n"
        + "\n"
        + "[disturbances]\n"
        + "fire_rate = 0.01\n"
        + "wind_rate = 0.005\n"
        + "seed = 9\n"
        + "\n"
        + "[[species]]\n"
        + "name = \"fagugran\"\n"
        + "conifer = false\n"
        + "presence = 1.0\n"
        + "max_init_age = 150\n"
        + "\n"
        + "[[species]]\n"
        + "name = \"tsugcana\"\n"
        + "conifer = true\n"
        + "presence = 1.0\n"
        + "max_init_age = 200\n"
        + "\n"
        + "[[agents]]\n"
        + "name = \"bark-disease\"\n"
        + "start_year = 0\n"
        + "end_year = 100\n"
        + "host_index_mode = \"mean\"\n"
        + "transmission_rate = 3.0\n"
        + "acquisition_rate = 0.3\n"
        + "kernel = \"negative-exponential\"\n"
        + "max_distance = 90.0\n"
        + "shape_alpha = 40.0\n"
        + "draw_count = 200\n"
        + "kernel_seed = 7\n"
        + "seed = 11\n"
        + "weather_mean = 1.0\n"
        + "weather_std_dev = 0.2\n"
        + "init_sites = [[8, 8]]\n"
        + "ecoregion_modifiers = [0.0, 0.1]\n"
        + "\n"
        + "[[agents.disturbance_modifiers]]\n"
        + "kind = \"fire\"\n"
        + "min_severity = 3\n"
        + "duration = 10\n"
        + "magnitude = 0.25\n"
        + "\n"
        + "[[agents.hosts]]\n"
        + "species = \"fagugran\"\n"
        + "host_ages = [10, 40, 90]\n"
        + "host_scores = [0.3, 0.6, 1.0]\n"
        + "vulnerable_ages = [20, 50, 100]\n"
        + "mortality_probs = [0.1, 0.3, 0.7]\n"
        + "mortality_of_interest = true\n"
        + "\n"
        + "[[agents.hosts]]\n"
        + "species = \"tsugcana\"\n"
        + "host_ages = [15, 45, 95]\n"
        + "host_scores = [0.2, 0.4, 0.8]\n"
        + "vulnerable_ages = [25, 55, 105]\n"
        + "mortality_probs = [0.1, 0.2, 0.5]\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_blight"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        assert!(
            output.status.success(),
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);

    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "1"]);

    assert!(test_dir.join("run-0000/trajectory-0002.msgpack").is_file());
    assert!(test_dir.join("run-0001/checkpoint.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);
    assert!(test_dir.join("run-0000/results.msgpack").is_file());
    assert!(test_dir.join("run-0001/results.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}
