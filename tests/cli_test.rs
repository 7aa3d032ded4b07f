//! CLI integration tests for the api-schema binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("api-schema"))
}

fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const MODEL: &str = r#"{
    "projects": [
        {
            "namespaceName": "EdFi",
            "projectName": "Ed-Fi",
            "projectVersion": "5.0.0",
            "entities": [
                { "kind": "descriptor", "name": "GradeLevel", "documentation": "Grade levels" },
                { "kind": "domainEntity", "name": "School", "documentation": "A school", "properties": [
                    { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true },
                    { "name": "NameOfInstitution", "type": "string", "isRequired": true, "maxLength": 20 }
                ]}
            ]
        },
        {
            "namespaceName": "Sample",
            "projectName": "Sample",
            "projectVersion": "1.0.0",
            "isExtension": true,
            "entities": [
                { "kind": "domainEntityExtension", "name": "School", "properties": [
                    { "name": "IsExemplary", "type": "boolean" }
                ]}
            ]
        }
    ]
}"#;

fn model_file(dir: &TempDir) -> std::path::PathBuf {
    write_temp_file(dir, "model.json", MODEL)
}

mod build_command {
    use super::*;

    #[test]
    fn builds_every_project() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args(["build", model.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""projectName":"Ed-Fi""#))
            .stdout(predicate::str::contains(r#""projectName":"Sample""#))
            .stdout(predicate::str::contains(r#""schoolYearTypes""#));
    }

    #[test]
    fn build_with_pretty() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args(["build", model.to_str().unwrap(), "--pretty"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("[\n"));
    }

    #[test]
    fn build_with_output_file() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let output = dir.path().join("out.json");

        cmd()
            .args([
                "build",
                model.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 2);
        assert_eq!(written[1]["projectSchema"]["isExtensionProject"], true);
    }

    #[test]
    fn school_year_flags_bound_the_schema() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args([
                "build",
                model.to_str().unwrap(),
                "--min-school-year",
                "2000",
                "--max-school-year",
                "2030",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""minimum":2000"#))
            .stdout(predicate::str::contains(r#""maximum":2030"#));
    }

    #[test]
    fn config_file_sets_options() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let config = write_temp_file(
            &dir,
            "custom.toml",
            "min_school_year = 2010\nmax_school_year = 2020\n",
        );

        cmd()
            .args([
                "build",
                model.to_str().unwrap(),
                "--config",
                config.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""minimum":2010"#));
    }
}

mod openapi_command {
    use super::*;

    #[test]
    fn core_resources_document() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args(["openapi", model.to_str().unwrap(), "--project", "Ed-Fi"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""openapi":"3.0.0""#))
            .stdout(predicate::str::contains("/ed-fi/schools/{id}"))
            .stdout(predicate::str::contains("gradeLevelDescriptors").not());
    }

    #[test]
    fn core_descriptors_document() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args([
                "openapi",
                model.to_str().unwrap(),
                "--project",
                "ed-fi",
                "--descriptors",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("/ed-fi/gradeLevelDescriptors"));
    }

    #[test]
    fn extension_fragments() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args(["openapi", model.to_str().unwrap(), "--project", "Sample"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""exts":{"EdFi_School""#))
            .stdout(predicate::str::contains(r#""newPaths":{}"#));
    }

    #[test]
    fn unknown_project() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args(["openapi", model.to_str().unwrap(), "--project", "Nope"])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("no project 'Nope'"));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_document() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(
            &dir,
            "school.json",
            r#"{ "schoolId": 255901, "nameOfInstitution": "Lincoln High" }"#,
        );

        cmd()
            .args([
                "validate",
                model.to_str().unwrap(),
                document.to_str().unwrap(),
                "--resource",
                "schools",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn missing_identity_fails() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(&dir, "school.json", r#"{ "nameOfInstitution": "Lincoln High" }"#);

        cmd()
            .args([
                "validate",
                model.to_str().unwrap(),
                document.to_str().unwrap(),
                "--resource",
                "schools",
            ])
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("Validation failed"));
    }

    #[test]
    fn update_requires_id() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(
            &dir,
            "school.json",
            r#"{ "schoolId": 255901, "nameOfInstitution": "Lincoln High" }"#,
        );

        cmd()
            .args([
                "validate",
                model.to_str().unwrap(),
                document.to_str().unwrap(),
                "--resource",
                "schools",
                "--update",
            ])
            .assert()
            .failure()
            .code(1);
    }

    #[test]
    fn json_output_invalid() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(
            &dir,
            "school.json",
            r#"{ "schoolId": "not a number", "nameOfInstitution": "Lincoln High" }"#,
        );

        cmd()
            .args([
                "validate",
                model.to_str().unwrap(),
                document.to_str().unwrap(),
                "--resource",
                "schools",
                "--json",
            ])
            .assert()
            .failure()
            .code(1)
            .stdout(predicate::str::contains(r#""valid":false"#))
            .stdout(predicate::str::contains("/schoolId"));
    }

    #[test]
    fn json_output_valid() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(
            &dir,
            "descriptor.json",
            r#"{ "namespace": "uri://ed-fi.org/GradeLevelDescriptor", "codeValue": "Ninth grade", "shortDescription": "Ninth grade" }"#,
        );

        cmd()
            .args([
                "validate",
                model.to_str().unwrap(),
                document.to_str().unwrap(),
                "--resource",
                "gradeLevelDescriptors",
                "--project",
                "Ed-Fi",
                "--json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"valid":true}"#));
    }

    #[test]
    fn unknown_resource() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(&dir, "doc.json", "{}");

        cmd()
            .args([
                "validate",
                model.to_str().unwrap(),
                document.to_str().unwrap(),
                "--resource",
                "students",
            ])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("no resource 'students'"));
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn model_file_not_found() {
        cmd()
            .args(["build", "/nonexistent/model.json"])
            .assert()
            .failure()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn invalid_model_json() {
        let dir = TempDir::new().unwrap();
        let model = write_temp_file(&dir, "model.json", "{ not json");

        cmd()
            .args(["build", model.to_str().unwrap()])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn dangling_reference() {
        let dir = TempDir::new().unwrap();
        let model = write_temp_file(
            &dir,
            "model.json",
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Section", "properties": [
                        { "name": "CourseOffering", "type": "domainEntity", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        );

        cmd()
            .args(["build", model.to_str().unwrap()])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("unknown entity"));
    }

    #[test]
    fn empty_school_year_range() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args([
                "build",
                model.to_str().unwrap(),
                "--min-school-year",
                "2030",
                "--max-school-year",
                "2000",
            ])
            .assert()
            .failure()
            .code(2)
            .stderr(predicate::str::contains("greater than max_school_year"));
    }

    #[test]
    fn config_file_not_found() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args([
                "build",
                model.to_str().unwrap(),
                "--config",
                "/nonexistent/api-schema.toml",
            ])
            .assert()
            .failure()
            .code(3);
    }
}

mod required_args {
    use super::*;

    #[test]
    fn missing_model_path() {
        cmd().arg("build").assert().failure();
    }

    #[test]
    fn missing_project_for_openapi() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);

        cmd()
            .args(["openapi", model.to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--project"));
    }

    #[test]
    fn missing_resource_for_validate() {
        let dir = TempDir::new().unwrap();
        let model = model_file(&dir);
        let document = write_temp_file(&dir, "doc.json", "{}");

        cmd()
            .args(["validate", model.to_str().unwrap(), document.to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--resource"));
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help_flag() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build"))
            .stdout(predicate::str::contains("openapi"))
            .stdout(predicate::str::contains("validate"));
    }

    #[test]
    fn version_flag() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("api-schema"));
    }

    #[test]
    fn build_help() {
        cmd()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--min-school-year"));
    }
}
