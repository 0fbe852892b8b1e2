//! Scanner configuration file rendering.

use std::path::Path;

use crate::error::Result;
use crate::fs::FileSystem;

/// Settings written to `sonar-project.properties` for the scanner container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerProperties {
    /// Directory holding the sources to analyse, as seen by the scanner.
    pub sources: String,
    /// Analysis server token.
    pub token: String,
    /// Analysis server URL, as seen by the scanner.
    pub host_url: String,
    /// Project key to report into.
    pub project_key: String,
}

impl ScannerProperties {
    /// Render the properties file contents.
    pub fn render(&self) -> String {
        format!(
            "sonar.scm.exclusions.disabled=true\n\
             sonar.sources={}\n\
             sonar.token={}\n\
             sonar.host.url={}\n\
             sonar.projectKey={}\n",
            self.sources, self.token, self.host_url, self.project_key
        )
    }

    /// Write the properties file, replacing any previous one.
    pub fn write_to<F: FileSystem + ?Sized>(&self, fs: &F, path: &Path) -> Result<()> {
        fs.write(path, self.render().as_bytes())
    }
}
