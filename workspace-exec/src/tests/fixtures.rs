/// Snippets with a known outcome
pub mod snippets {
    pub const ADDITION: &str = "Console.WriteLine(1+1);";
    pub const MALFORMED: &str = "int x = ;";
    pub const THROWS: &str = r#"throw new Exception("boom");"#;
    pub const INFINITE_LOOP: &str = "while(true){}";
    pub const EMPTY: &str = "";

    pub const MULTI_LINE: &str = r#"
var words = new List<string> { "alpha", "beta", "gamma" };
foreach (var word in words.Where(w => w.Length > 4))
{
    Console.WriteLine(word.ToUpper());
}
"#;

    pub const PARTIAL_THEN_LOOP: &str = r#"Console.WriteLine("tick"); Console.Out.Flush(); while(true){}"#;

    pub const PARTIAL_THEN_THROW: &str =
        r#"Console.WriteLine("before"); throw new InvalidOperationException("after");"#;

    // CS0219: assigned but its value is never used
    pub const WARNING_ONLY: &str = r#"int unused = 1; Console.WriteLine("ok");"#;

    pub const TYPE_ERROR: &str = "int x = \"text\";";
}

/// Expected console output
pub mod expected {
    pub const ADDITION: &[&str] = &["2"];
    pub const MULTI_LINE: &[&str] = &["ALPHA", "GAMMA"];
}
