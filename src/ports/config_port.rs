//! Configuration access port trait.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// Comma-separated value split into trimmed, non-empty items.
    fn get_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.get_string(section, key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}
