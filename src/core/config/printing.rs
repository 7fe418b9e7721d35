use crate::core::config::data::Config;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  template: {}", self.active_template());
        println!("  edit-interval: {}ms", self.edit_interval().as_millis());
        match &self.bot_username {
            Some(name) => println!("  bot-username: {name}"),
            None => println!("  bot-username: (unset)"),
        }
        println!("  log-filter: {}", self.log_filter());
        println!("  backend:");
        println!("    kind: {}", self.backend.kind);
        println!("    endpoint: {}", self.backend.endpoint);
        match &self.backend.model {
            Some(model) => println!("    model: {model}"),
            None => println!("    model: (unset)"),
        }
        match &self.backend.api_key_env {
            Some(var) if self.backend.api_key().is_some() => println!("    api-key: ${var} (set)"),
            Some(var) => println!("    api-key: ${var} (missing)"),
            None => println!("    api-key: (none)"),
        }
        if self.generation.is_empty() {
            println!("  generation: (defaults)");
        } else {
            println!("  generation:");
            for (key, value) in self.generation.as_map() {
                println!("    {key}: {value}");
            }
        }
        if !self.templates.is_empty() {
            println!("  custom-templates:");
            for template in &self.templates {
                println!("    {}", template.name);
            }
        }
    }
}
