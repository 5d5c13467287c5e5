//! Localized message catalog.
//!
//! The transfer engine reports classified results only; every string a
//! human reads comes from here and is rendered by the binary. Keeping the
//! catalog in one place is what lets the UI switch between English and
//! Japanese without the engine knowing.

use std::str::FromStr;

use crate::error::ErrorKind;

/// UI language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Ja,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ja" => Ok(Language::Ja),
            other => Err(format!("unknown language {other:?} (expected en|ja)")),
        }
    }
}

/// The user-visible operations, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListObjects,
    Download,
    Upload,
    Delete,
    ExportInventory,
}

impl Operation {
    /// All operations, in the order the menu presents them.
    pub const ALL: [Operation; 5] = [
        Operation::ListObjects,
        Operation::Download,
        Operation::Upload,
        Operation::Delete,
        Operation::ExportInventory,
    ];
}

/// Resolved message catalog for one language.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    lang: Language,
}

impl Catalog {
    pub fn new(lang: Language) -> Self {
        Self { lang }
    }

    pub fn language(&self) -> Language {
        self.lang
    }

    pub fn bucket_prompt(&self) -> &'static str {
        match self.lang {
            Language::En => "Which bucket do you use?",
            Language::Ja => "どのバケットを利用しますか?",
        }
    }

    pub fn operation_prompt(&self) -> &'static str {
        match self.lang {
            Language::En => "What are you doing?",
            Language::Ja => "何をしますか?",
        }
    }

    pub fn operation_label(&self, op: Operation) -> &'static str {
        match (self.lang, op) {
            (Language::En, Operation::ListObjects) => "Show object list",
            (Language::En, Operation::Download) => "Download object",
            (Language::En, Operation::Upload) => "Upload file",
            (Language::En, Operation::Delete) => "Delete object",
            (Language::En, Operation::ExportInventory) => "Save object list to file",
            (Language::Ja, Operation::ListObjects) => "オブジェクト一覧を表示する",
            (Language::Ja, Operation::Download) => "オブジェクトをダウンロードする",
            (Language::Ja, Operation::Upload) => "ファイルをアップロードする",
            (Language::Ja, Operation::Delete) => "オブジェクトを削除する",
            (Language::Ja, Operation::ExportInventory) => "オブジェクトリストを保存する",
        }
    }

    pub fn download_prompt(&self) -> &'static str {
        match self.lang {
            Language::En => "Which object do you want to download?",
            Language::Ja => "どのオブジェクトをダウンロードしますか?",
        }
    }

    pub fn upload_prompt(&self) -> &'static str {
        match self.lang {
            Language::En => "Which files do you want to upload?",
            Language::Ja => "どのファイルをアップロードしますか?",
        }
    }

    pub fn delete_prompt(&self) -> &'static str {
        match self.lang {
            Language::En => "Which objects do you want to delete?",
            Language::Ja => "どのオブジェクトを削除しますか?",
        }
    }

    pub fn overwrite_prompt(&self, name: &str) -> String {
        match self.lang {
            Language::En => format!("{name} already exists. Overwrite?"),
            Language::Ja => format!("{name} は既に存在します。上書きしますか?"),
        }
    }

    pub fn quit_label(&self) -> &'static str {
        match self.lang {
            Language::En => "Quit",
            Language::Ja => "終了する",
        }
    }

    pub fn downloaded(&self, key: &str, dest: &str) -> String {
        match self.lang {
            Language::En => format!("Downloaded {key} to {dest}"),
            Language::Ja => format!("{key} を {dest} にダウンロードしました"),
        }
    }

    pub fn uploaded(&self, key: &str) -> String {
        match self.lang {
            Language::En => format!("Uploaded {key}"),
            Language::Ja => format!("{key} をアップロードしました"),
        }
    }

    pub fn uploaded_many(&self, count: usize, elapsed: &str) -> String {
        match self.lang {
            Language::En => format!("Uploaded {count} file(s) in {elapsed}"),
            Language::Ja => format!("{count} 件のファイルを {elapsed} でアップロードしました"),
        }
    }

    pub fn deleted(&self, count: usize) -> String {
        match self.lang {
            Language::En => format!("Deleted {count} object(s)"),
            Language::Ja => format!("{count} 件のオブジェクトを削除しました"),
        }
    }

    pub fn inventory_saved(&self, path: &str, count: usize) -> String {
        match self.lang {
            Language::En => format!("Saved {count} object(s) to {path}"),
            Language::Ja => format!("{count} 件のオブジェクトを {path} に保存しました"),
        }
    }

    pub fn cancelled(&self) -> &'static str {
        match self.lang {
            Language::En => "Cancelled.",
            Language::Ja => "キャンセルしました。",
        }
    }

    pub fn stop_notice(&self) -> &'static str {
        match self.lang {
            Language::En => {
                "Stop requested — finishing in-flight work (press Ctrl-C again to exit immediately)."
            }
            Language::Ja => {
                "停止要求を受け付けました。実行中の処理を終了しています (すぐに終了するにはもう一度 Ctrl-C)。"
            }
        }
    }

    /// One-line description of a classified failure.
    pub fn failure_message(&self, kind: ErrorKind) -> &'static str {
        match (self.lang, kind) {
            (Language::En, ErrorKind::NotFound) => "The bucket or object was not found.",
            (Language::En, ErrorKind::PermissionDenied) => "Access was denied by the service.",
            (Language::En, ErrorKind::InvalidBucketName) => "The bucket name is not valid.",
            (Language::En, ErrorKind::InvalidKey) => "The object key is not valid.",
            (Language::En, ErrorKind::Throttled) => "The service is rate limiting requests.",
            (Language::En, ErrorKind::Transient) => "A temporary network or service error occurred.",
            (Language::En, ErrorKind::Fatal) => "The service returned an unexpected response.",
            (Language::En, ErrorKind::Cancelled) => "The operation was cancelled.",
            (Language::Ja, ErrorKind::NotFound) => "バケットまたはオブジェクトが見つかりません。",
            (Language::Ja, ErrorKind::PermissionDenied) => "アクセスが拒否されました。",
            (Language::Ja, ErrorKind::InvalidBucketName) => "バケット名が不正です。",
            (Language::Ja, ErrorKind::InvalidKey) => "オブジェクトキーが不正です。",
            (Language::Ja, ErrorKind::Throttled) => "リクエストが制限されています。",
            (Language::Ja, ErrorKind::Transient) => "一時的なネットワークまたはサービスエラーが発生しました。",
            (Language::Ja, ErrorKind::Fatal) => "サービスから予期しない応答が返されました。",
            (Language::Ja, ErrorKind::Cancelled) => "操作はキャンセルされました。",
        }
    }

    /// Short remedy hint attached to a failure message.
    pub fn failure_hint(&self, kind: ErrorKind) -> &'static str {
        match (self.lang, kind) {
            (Language::En, ErrorKind::NotFound) => "Check the bucket and key spelling.",
            (Language::En, ErrorKind::PermissionDenied) => "Check your credentials and policies.",
            (Language::En, ErrorKind::InvalidBucketName) => "Check the bucket name spelling.",
            (Language::En, ErrorKind::InvalidKey) => "Check the object key.",
            (Language::En, ErrorKind::Throttled) => "Try again later or reduce workers.",
            (Language::En, ErrorKind::Transient) => "Try again later.",
            (Language::En, ErrorKind::Fatal) => "See the log for details.",
            (Language::En, ErrorKind::Cancelled) => "",
            (Language::Ja, ErrorKind::NotFound) => "バケット名とキーを確認してください。",
            (Language::Ja, ErrorKind::PermissionDenied) => "認証情報とポリシーを確認してください。",
            (Language::Ja, ErrorKind::InvalidBucketName) => "バケット名を確認してください。",
            (Language::Ja, ErrorKind::InvalidKey) => "オブジェクトキーを確認してください。",
            (Language::Ja, ErrorKind::Throttled) => "時間をおいて再試行するかワーカー数を減らしてください。",
            (Language::Ja, ErrorKind::Transient) => "時間をおいて再試行してください。",
            (Language::Ja, ErrorKind::Fatal) => "詳細はログを確認してください。",
            (Language::Ja, ErrorKind::Cancelled) => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [ErrorKind; 8] = [
        ErrorKind::NotFound,
        ErrorKind::PermissionDenied,
        ErrorKind::InvalidBucketName,
        ErrorKind::InvalidKey,
        ErrorKind::Throttled,
        ErrorKind::Transient,
        ErrorKind::Fatal,
        ErrorKind::Cancelled,
    ];

    #[test]
    fn language_parses_both_codes() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("JA".parse::<Language>().unwrap(), Language::Ja);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn every_kind_has_a_message_in_both_languages() {
        for lang in [Language::En, Language::Ja] {
            let catalog = Catalog::new(lang);
            for kind in KINDS {
                assert!(!catalog.failure_message(kind).is_empty());
                // Cancelled is non-fault and carries no remedy.
                if kind != ErrorKind::Cancelled {
                    assert!(!catalog.failure_hint(kind).is_empty());
                }
            }
        }
    }

    #[test]
    fn every_operation_has_a_label_in_both_languages() {
        for lang in [Language::En, Language::Ja] {
            let catalog = Catalog::new(lang);
            for op in Operation::ALL {
                assert!(!catalog.operation_label(op).is_empty());
            }
        }
    }
}
