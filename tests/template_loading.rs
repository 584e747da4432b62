//! Template trees loaded from disk.

use std::fs;

use camino::Utf8PathBuf;
use serde_json::json;
use stagehand::load_template;
use tempfile::TempDir;

#[test]
fn nested_directories_become_nested_mappings() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
    let write = |relative: &str, body: &str| {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
        }
        fs::write(&path, body).unwrap_or_else(|err| panic!("write {relative}: {err}"));
    };
    write("stack/main.json", r#"{"AWSTemplateFormatVersion": "2010-09-09"}"#);
    write("stack/Resources/main.yml", "Shared: true\n");
    write("stack/Resources/Web/main.yaml", "Type: AWS::EC2::Instance\n");
    write("stack/Resources/Web/Properties.json", r#"{"ImageId": "ami-1"}"#);
    write("stack/Resources/.DS_Store", "junk");

    let template = load_template(&root.join("stack"))
        .unwrap_or_else(|err| panic!("template should load: {err}"));

    assert_eq!(
        template,
        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Resources": {
                "Shared": true,
                "Web": {
                    "Type": "AWS::EC2::Instance",
                    "Properties": {"ImageId": "ami-1"}
                }
            }
        })
    );
}
