use crate::model::StatusReport;
use anyhow::Result;

pub fn print_json(report: &StatusReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::model::{ManifestFile, Package, Project, Status, StatusReport};

    #[test]
    fn test_report_serializes_statuses_lowercase() {
        let mut project = Project::new("/work/alpha");
        let mut manifest = ManifestFile::new(
            "/work/alpha",
            "/work/alpha/requirements.txt",
            vec![Package::pinned("foo", "1.0")],
        );
        manifest.record_check(Vec::new());
        project.manifests = Some(vec![manifest]);
        project.refresh_status();

        let report = StatusReport::new(Status::Secure, vec![project]);
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["aggregate"], "secure");
        assert_eq!(value["projects"][0]["name"], "alpha");
        assert_eq!(value["projects"][0]["manifests"][0]["status"], "secure");
    }
}
