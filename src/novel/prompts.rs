//! 提示词模板：内置简短默认值，可被 config/prompts/<name>.txt 覆盖
//!
//! 模板中的 `{name}` 占位符由 render 替换。

/// 各环节的系统提示词
#[derive(Debug, Clone, PartialEq)]
pub struct Prompts {
    /// 写章节，占位符 {target_words}
    pub chapter: String,
    /// 扩写，占位符 {content} {target_words}
    pub expand: String,
    /// 精简，占位符 {content} {target_words}
    pub condense: String,
    pub review: String,
    pub revise: String,
    pub summary: String,
    pub brief: String,
    pub compression: String,
    pub style: String,
    pub life_event: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            chapter: "你是一位职业网络小说作者。根据创作简报写出完整的一章正文，首行为「第N章 标题」，正文约 {target_words} 字。只输出正文。".into(),
            expand: "下面这一章字数不足，请在不改变情节走向的前提下扩写到约 {target_words} 字，只输出完整正文。\n\n{content}".into(),
            condense: "下面这一章篇幅过长，请精简到约 {target_words} 字，保留关键情节，只输出完整正文。\n\n{content}".into(),
            review: "你是严格的网文编辑。审核章节并只返回 JSON：{\"score\": 0-100, \"passed\": bool, \"comments\": \"总体评价\", \"suggestions\": [\"修改建议\"]}".into(),
            revise: "你是职业网络小说作者。根据修改意见重写章节，保持设定一致，只输出完整正文。".into(),
            summary: "为章节生成索引，只返回 JSON：{\"summary\": \"摘要\", \"key_events\": [], \"foreshadowing\": [], \"items_acquired\": [], \"plot_progression_score\": 0-10}".into(),
            brief: "你是小说主编。根据设定、历史与节奏数据，为下一章写一份简短的创作简报：本章目标、冲突、结尾钩子，避免剧情偏离设定。".into(),
            compression: "把已有的历史背景与待压缩章节合并成一段连贯的剧情梗概，保留人物关系、伏笔与关键道具。只输出梗概。".into(),
            style: "根据最近章节摘要与当前风格描述，提炼作者当前的写作风格，一段话即可。".into(),
            life_event: "为一位网文作者生成一件现实生活中的小事件，只返回 JSON：{\"event\": \"事件\", \"effect\": \"对写作的影响\"}".into(),
        }
    }
}

const SEARCH_DIRS: [&str; 2] = ["config/prompts", "../config/prompts"];

impl Prompts {
    /// 内置默认值，逐项尝试从 config/prompts/<name>.txt 覆盖
    pub fn load() -> Self {
        let mut prompts = Self::default();
        for (name, slot) in prompts.slots_mut() {
            if let Some(text) = SEARCH_DIRS
                .iter()
                .find_map(|dir| std::fs::read_to_string(format!("{}/{}.txt", dir, name)).ok())
            {
                tracing::debug!("prompt '{}' overridden from file", name);
                *slot = text;
            }
        }
        prompts
    }

    fn slots_mut(&mut self) -> [(&'static str, &mut String); 10] {
        [
            ("chapter", &mut self.chapter),
            ("expand", &mut self.expand),
            ("condense", &mut self.condense),
            ("review", &mut self.review),
            ("revise", &mut self.revise),
            ("summary", &mut self.summary),
            ("brief", &mut self.brief),
            ("compression", &mut self.compression),
            ("style", &mut self.style),
            ("life_event", &mut self.life_event),
        ]
    }
}

/// 替换 `{key}` 占位符
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (k, v)| {
        acc.replace(&format!("{{{}}}", k), v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_placeholders() {
        let out = render("写 {target_words} 字：{content}", &[("target_words", "2000"), ("content", "正文")]);
        assert_eq!(out, "写 2000 字：正文");
    }

    #[test]
    fn test_render_leaves_json_braces() {
        let out = render(&Prompts::default().review, &[("target_words", "1")]);
        assert!(out.contains("{\"score\""));
    }
}
