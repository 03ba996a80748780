//! Utterance routing.
//!
//! Classifies an utterance as `general` or `data_analysis` by keyword
//! heuristic. Routing is an optimisation, not a correctness constraint: a
//! misrouted general question still gets a correct direct answer.

/// Route chosen for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Answered by a direct LLM call; bypasses the plan loop.
    General,
    /// Enters the plan-execute-reflect loop.
    DataAnalysis,
}

const DATA_KEYWORDS: &[&str] = &[
    // query shapes
    "how many", "count", "average", "avg", "sum", "total", "median", "rate",
    "per capita", "top ", "group by", "select ", "join",
    // data nouns
    "table", "rows", "column", "data", "database", "statistics", "gdp",
    "population", "trend", "growth",
    // chart asks
    "chart", "plot", "graph", "visuali",
    // Korean equivalents (KOSIS domain)
    "몇", "평균", "합계", "통계", "데이터", "조회", "추이", "인구", "차트",
];

/// Classifies an utterance.
pub fn classify(utterance: &str) -> Route {
    let lower = utterance.to_lowercase();
    if DATA_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Route::DataAnalysis
    } else {
        Route::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_analysis_keywords() {
        assert_eq!(classify("How many users signed up?"), Route::DataAnalysis);
        assert_eq!(classify("GDP growth rate 2020-2023"), Route::DataAnalysis);
        assert_eq!(classify("plot revenue by month"), Route::DataAnalysis);
        assert_eq!(classify("SELECT * FROM users"), Route::DataAnalysis);
        assert_eq!(classify("인구 통계 보여줘"), Route::DataAnalysis);
    }

    #[test]
    fn test_general_questions() {
        assert_eq!(classify("hello there"), Route::General);
        assert_eq!(classify("what can you do?"), Route::General);
        assert_eq!(classify("thanks!"), Route::General);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("COUNT the orders"), Route::DataAnalysis);
    }
}
