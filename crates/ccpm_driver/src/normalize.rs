/// Best-effort rewrite of a user-provided repository URL into the raw-file
/// prefix a common forge host serves under, per §4.1. An unrecognised host
/// is passed through unchanged.
///
/// Currently recognised: GitHub repository URLs (`https://github.com/<owner>/<repo>`)
/// are rewritten to the raw-content URL on the `dist` branch, which is where
/// a repository's `manifest.json` and `pool/` are expected to live.
pub fn normalize_repository_url(url: &str) -> String {
    if let Some(rest) = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
    {
        let rest = rest.trim_end_matches('/');
        let mut parts = rest.splitn(2, '/');
        let owner = parts.next();
        let repo = parts.next();
        if let (Some(owner), Some(repo)) = (owner, repo) {
            // Drop everything past `<owner>/<repo>` (e.g. `/tree/main`).
            let repo = repo.split('/').next().unwrap_or(repo);
            let repo = repo.trim_end_matches(".git");
            return format!("https://raw.githubusercontent.com/{owner}/{repo}/dist");
        }
    }
    url.to_string()
}
