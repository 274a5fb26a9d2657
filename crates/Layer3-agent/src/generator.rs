//! Project generator - 작업 설명을 파일 묶음으로 바꾼다
//!
//! 실제 모델 호출은 외부 협력자다. `TemplateGenerator`는 오프라인에서
//! 동작하는 기본 구현 (Next.js + Tailwind 카운터 스타터).

use agentbox_foundation::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Files (workspace-relative path → content) plus a one-line summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProject {
    pub files: BTreeMap<String, String>,
    pub summary: String,
}

impl GeneratedProject {
    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Turns a task description into a project
#[async_trait]
pub trait ProjectGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Failures are `Error::Generation`
    async fn generate(&self, description: &str) -> Result<GeneratedProject>;
}

/// Built-in offline generator
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProjectGenerator for TemplateGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, description: &str) -> Result<GeneratedProject> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::Generation("Empty task description".to_string()));
        }

        let files = [
            ("app/page.tsx", PAGE_TSX),
            ("app/layout.tsx", LAYOUT_TSX),
            ("app/globals.css", GLOBALS_CSS),
            ("tailwind.config.js", TAILWIND_CONFIG),
            ("next.config.js", NEXT_CONFIG),
            ("tsconfig.json", TSCONFIG),
            (".gitignore", GITIGNORE),
        ]
        .into_iter()
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect();

        Ok(GeneratedProject {
            files,
            summary: format!(
                "Generated a {} using Next.js and Tailwind CSS. The app includes a counter with increment, decrement, and reset functionality.",
                description.to_lowercase()
            ),
        })
    }
}

const PAGE_TSX: &str = r#"'use client';

import { useState } from 'react';

export default function Home() {
  const [count, setCount] = useState(0);

  return (
    <div className="min-h-screen bg-gray-100 flex items-center justify-center">
      <div className="bg-white p-8 rounded-lg shadow-md">
        <h1 className="text-3xl font-bold text-center mb-8 text-gray-800">Counter App</h1>
        <div className="text-center">
          <div className="text-6xl font-mono font-bold text-blue-600 mb-8">{count}</div>
          <div className="space-x-4">
            <button
              onClick={() => setCount(count - 1)}
              className="bg-red-500 hover:bg-red-700 text-white font-bold py-2 px-4 rounded"
            >
              Decrement
            </button>
            <button
              onClick={() => setCount(count + 1)}
              className="bg-green-500 hover:bg-green-700 text-white font-bold py-2 px-4 rounded"
            >
              Increment
            </button>
          </div>
          <button
            onClick={() => setCount(0)}
            className="mt-4 bg-gray-500 hover:bg-gray-700 text-white font-bold py-2 px-4 rounded"
          >
            Reset
          </button>
        </div>
      </div>
    </div>
  );
}
"#;

const LAYOUT_TSX: &str = r#"import type { Metadata } from 'next';
import './globals.css';

export const metadata: Metadata = {
  title: 'Counter App',
  description: 'A simple counter application built with Next.js',
};

export default function RootLayout({ children }: { children: React.ReactNode }) {
  return (
    <html lang="en">
      <body className="antialiased">{children}</body>
    </html>
  );
}
"#;

const GLOBALS_CSS: &str = r#"@tailwind base;
@tailwind components;
@tailwind utilities;

body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', 'Roboto', sans-serif;
}
"#;

const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
module.exports = {
  content: [
    './pages/**/*.{js,ts,jsx,tsx,mdx}',
    './components/**/*.{js,ts,jsx,tsx,mdx}',
    './app/**/*.{js,ts,jsx,tsx,mdx}',
  ],
  theme: {
    extend: {},
  },
  plugins: [],
};
"#;

const NEXT_CONFIG: &str = r#"/** @type {import('next').NextConfig} */
const nextConfig = {};

module.exports = nextConfig;
"#;

const TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "es5",
    "lib": ["dom", "dom.iterable", "es6"],
    "allowJs": true,
    "skipLibCheck": true,
    "strict": true,
    "noEmit": true,
    "esModuleInterop": true,
    "module": "esnext",
    "moduleResolution": "bundler",
    "resolveJsonModule": true,
    "isolatedModules": true,
    "jsx": "preserve",
    "incremental": true,
    "plugins": [{ "name": "next" }],
    "paths": { "@/*": ["./*"] }
  },
  "include": ["next-env.d.ts", "**/*.ts", "**/*.tsx", ".next/types/**/*.ts"],
  "exclude": ["node_modules"]
}
"#;

const GITIGNORE: &str = r#"# dependencies
/node_modules
/.pnp
.pnp.js

# testing
/coverage

# next.js
/.next/
/out/

# production
/build

# misc
.DS_Store
*.pem

# debug
npm-debug.log*

# local env files
.env*.local

# typescript
*.tsbuildinfo
next-env.d.ts
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_files() {
        let project = TemplateGenerator::new().generate("Counter App").await.unwrap();
        assert!(project.files.contains_key("app/page.tsx"));
        assert!(project.files.contains_key(".gitignore"));
        assert!(!project.files.contains_key("package.json"));
        assert!(project.summary.starts_with("Generated a counter app using Next.js"));
    }

    #[tokio::test]
    async fn test_tsconfig_is_valid_json() {
        let project = TemplateGenerator::new().generate("x").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&project.files["tsconfig.json"]).unwrap();
        assert_eq!(parsed["compilerOptions"]["jsx"], "preserve");
    }

    #[tokio::test]
    async fn test_empty_description() {
        let err = TemplateGenerator::new().generate("  ").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }
}
