use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::ResourceExtractor;
use crate::ir::Resource;

/// Header-only extractor for HCL resource blocks.
///
/// Attribute bodies are not captured, and matches inside comments or heredocs
/// are reported like any other header.
pub struct TerraformExtractor;

static RESOURCE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"resource\s+"([^"]+)"\s+"([^"]+)"\s*\{"#).unwrap());

impl ResourceExtractor for TerraformExtractor {
    fn extension(&self) -> &'static str {
        "tf"
    }

    fn extract(&self, path: &Path, content: &str) -> Vec<Resource> {
        RESOURCE_HEADER_RE
            .captures_iter(content)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let line = content[..whole.start()].matches('\n').count() + 1;
                Some(Resource::new(
                    cap.get(1)?.as_str(),
                    cap.get(2)?.as_str(),
                    path.to_path_buf(),
                    line,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(code: &str) -> Vec<Resource> {
        TerraformExtractor.extract(Path::new("main.tf"), code)
    }

    #[test]
    fn extracts_type_name_and_line() {
        let code = r#"
provider "aws" {
  region = "us-east-1"
}

resource "aws_s3_bucket" "logs" {
  bucket = "my-logs"
}
"#;
        let resources = extract(code);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].resource_type, "aws_s3_bucket");
        assert_eq!(resources[0].name, "logs");
        assert_eq!(resources[0].line, 6);
    }

    #[test]
    fn ignores_data_and_module_blocks() {
        let code = "data \"aws_ami\" \"ubuntu\" {}\nmodule \"vpc\" {}\n";
        assert!(extract(code).is_empty());
    }

    #[test]
    fn matches_commented_headers_too() {
        let code = "# resource \"aws_instance\" \"old\" {\nresource \"aws_instance\" \"web\"{\n}";
        let names: Vec<_> = extract(code).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["old", "web"]);
    }

    #[test]
    fn tolerates_extra_whitespace() {
        let code = "resource   \"aws_vpc\"\t\"main\"   {\n}";
        assert_eq!(extract(code)[0].address, "aws_vpc.main");
    }
}
