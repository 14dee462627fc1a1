//! File templates for generated projects.
//!
//! A [`TemplateLibrary`] is a pure function from a [`ProjectPlan`] and a
//! [`Section`] to file contents. The pipeline owns all file system writes.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::concept::Concept;
use crate::scheduler::job::AppSpec;

/// Portion of the project produced during one generation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    Scaffold,
    Ui,
    Logic,
    Features,
}

/// One file to be written, relative to the artifact root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
    pub executable: bool,
}

impl GeneratedFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            executable: false,
        }
    }

    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }

    /// True if the path is relative and never leaves the directory it is
    /// joined onto.
    pub fn is_contained(&self) -> bool {
        is_contained(&self.path)
    }
}

pub fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Everything the templates need to know about the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub app_name: String,
    pub package_name: String,
    pub description: String,
    pub category: String,
    pub language: String,
    pub theme: String,
    pub ui_framework: String,
    pub features: Vec<String>,
    pub screens: Vec<String>,
    pub permissions: Vec<String>,
    pub dependencies: Vec<String>,
}

impl ProjectPlan {
    pub fn new(spec: &AppSpec, concept: Concept) -> Self {
        let app_name = spec.app_name.clone().unwrap_or(concept.app_name);
        let mut screens = concept.screens;
        if screens.is_empty() {
            screens.push("MainActivity".to_string());
        }
        Self {
            package_name: package_name_for(&app_name),
            app_name,
            description: concept.description,
            category: concept.category,
            language: spec.language.clone(),
            theme: spec.theme.clone(),
            ui_framework: spec.ui_framework.clone(),
            features: concept.features,
            screens,
            permissions: concept.permissions,
            dependencies: concept.dependencies,
        }
    }

    pub fn is_kotlin(&self) -> bool {
        self.language == "kotlin"
    }

    fn source_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(if self.is_kotlin() {
            "app/src/main/kotlin"
        } else {
            "app/src/main/java"
        });
        for part in self.package_name.split('.') {
            dir.push(part);
        }
        dir
    }
}

/// `com.example.<name>` with the name reduced to lowercase ASCII alphanumerics.
pub fn package_name_for(app_name: &str) -> String {
    let mut segment: String = app_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if segment.is_empty() {
        segment = "app".to_string();
    } else if segment.starts_with(|c: char| c.is_ascii_digit()) {
        segment.insert_str(0, "app");
    }
    format!("com.example.{}", segment)
}

pub trait TemplateLibrary: Send + Sync {
    fn render(&self, plan: &ProjectPlan, section: Section) -> Vec<GeneratedFile>;
}

/// Minimal Gradle based Android project.
#[derive(Debug, Clone, Copy, Default)]
pub struct AndroidTemplates;

impl TemplateLibrary for AndroidTemplates {
    fn render(&self, plan: &ProjectPlan, section: Section) -> Vec<GeneratedFile> {
        match section {
            Section::Scaffold => scaffold(plan),
            Section::Ui => ui(plan),
            Section::Logic => logic(plan),
            Section::Features => features(plan),
        }
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "\\'")
}

fn layout_name(screen: &str) -> String {
    let base = screen.strip_suffix("Activity").unwrap_or(screen);
    let mut out = String::from("activity");
    for c in base.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        }
    }
    out
}

fn scaffold(plan: &ProjectPlan) -> Vec<GeneratedFile> {
    let root_name = plan.package_name.rsplit('.').next().unwrap_or("app");
    let settings = format!(
        r#"pluginManagement {{
    repositories {{
        google()
        mavenCentral()
        gradlePluginPortal()
    }}
}}
dependencyResolutionManagement {{
    repositoriesMode.set(RepositoriesMode.FAIL_ON_PROJECT_REPOS)
    repositories {{
        google()
        mavenCentral()
    }}
}}

rootProject.name = "{root_name}"
include ':app'
"#
    );

    let kotlin_classpath = if plan.is_kotlin() {
        "\n        classpath 'org.jetbrains.kotlin:kotlin-gradle-plugin:1.9.22'"
    } else {
        ""
    };
    let root_build = format!(
        r#"buildscript {{
    repositories {{
        google()
        mavenCentral()
    }}
    dependencies {{
        classpath 'com.android.tools.build:gradle:8.0.2'{kotlin_classpath}
    }}
}}
"#
    );

    let kotlin_plugin = if plan.is_kotlin() {
        "\n    id 'org.jetbrains.kotlin.android'"
    } else {
        ""
    };
    let compose = if plan.ui_framework == "compose" {
        "\n        compose true"
    } else {
        ""
    };
    let app_build = format!(
        r#"plugins {{
    id 'com.android.application'{kotlin_plugin}
}}

android {{
    namespace "{pkg}"
    compileSdk 34

    defaultConfig {{
        applicationId "{pkg}"
        minSdk 24
        targetSdk 34
        versionCode 1
        versionName "1.0"
    }}

    compileOptions {{
        sourceCompatibility JavaVersion.VERSION_1_8
        targetCompatibility JavaVersion.VERSION_1_8
    }}

    buildFeatures {{
        viewBinding true{compose}
    }}
}}

dependencies {{
    implementation 'androidx.appcompat:appcompat:1.6.1'
    implementation 'com.google.android.material:material:1.11.0'
    implementation 'androidx.constraintlayout:constraintlayout:2.1.4'
    testImplementation 'junit:junit:4.13.2'
}}
"#,
        pkg = plan.package_name,
    );

    let properties = "org.gradle.jvmargs=-Xmx2048m -Dfile.encoding=UTF-8\n\
                      org.gradle.parallel=true\n\
                      android.useAndroidX=true\n";

    let wrapper = r#"#!/bin/sh
# Delegates to a system-wide Gradle installation.
if ! command -v gradle >/dev/null 2>&1; then
    echo "ERROR: gradle not found on PATH" >&2
    exit 127
fi
exec gradle "$@"
"#;

    let permissions: String = plan
        .permissions
        .iter()
        .map(|p| format!("    <uses-permission android:name=\"android.permission.{}\" />\n", p))
        .collect();
    let activities: String = plan
        .screens
        .iter()
        .enumerate()
        .map(|(i, screen)| {
            if i == 0 {
                format!(
                    r#"        <activity
            android:name=".{screen}"
            android:exported="true">
            <intent-filter>
                <action android:name="android.intent.action.MAIN" />
                <category android:name="android.intent.category.LAUNCHER" />
            </intent-filter>
        </activity>
"#
                )
            } else {
                format!("        <activity android:name=\".{}\" />\n", screen)
            }
        })
        .collect();
    let manifest = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android">

{permissions}
    <application
        android:allowBackup="true"
        android:label="@string/app_name"
        android:theme="@style/AppTheme">
{activities}    </application>

</manifest>
"#
    );

    vec![
        GeneratedFile::new("settings.gradle", settings),
        GeneratedFile::new("build.gradle", root_build),
        GeneratedFile::new("gradle.properties", properties),
        GeneratedFile::new("gradlew", wrapper).executable(),
        GeneratedFile::new("app/build.gradle", app_build),
        GeneratedFile::new("app/proguard-rules.pro", "# Project specific ProGuard rules.\n"),
        GeneratedFile::new("app/src/main/AndroidManifest.xml", manifest),
    ]
}

fn ui(plan: &ProjectPlan) -> Vec<GeneratedFile> {
    let parent_theme = match plan.theme.as_str() {
        "dark" => "Theme.MaterialComponents.NoActionBar",
        "auto" => "Theme.MaterialComponents.DayNight.NoActionBar",
        _ => "Theme.MaterialComponents.Light.NoActionBar",
    };

    let feature_items: String = plan
        .features
        .iter()
        .map(|f| format!("        <item>{}</item>\n", xml_escape(f)))
        .collect();
    let strings = format!(
        r#"<resources>
    <string name="app_name">{name}</string>
    <string name="app_description">{description}</string>
    <string-array name="features">
{feature_items}    </string-array>
</resources>
"#,
        name = xml_escape(&plan.app_name),
        description = xml_escape(&plan.description),
    );

    let themes = format!(
        r#"<resources>
    <style name="AppTheme" parent="{parent_theme}">
        <item name="colorPrimary">#5A67D8</item>
        <item name="colorSecondary">#48BB78</item>
    </style>
</resources>
"#
    );

    let mut files = vec![
        GeneratedFile::new("app/src/main/res/values/strings.xml", strings),
        GeneratedFile::new("app/src/main/res/values/themes.xml", themes),
    ];

    for screen in &plan.screens {
        let title = screen.strip_suffix("Activity").unwrap_or(screen);
        let layout = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<LinearLayout xmlns:android="http://schemas.android.com/apk/res/android"
    android:layout_width="match_parent"
    android:layout_height="match_parent"
    android:orientation="vertical"
    android:padding="16dp">

    <TextView
        android:id="@+id/title"
        android:layout_width="wrap_content"
        android:layout_height="wrap_content"
        android:text="{title}"
        android:textSize="24sp" />

</LinearLayout>
"#,
            title = xml_escape(title),
        );
        files.push(GeneratedFile::new(
            format!("app/src/main/res/layout/{}.xml", layout_name(screen)),
            layout,
        ));
    }
    files
}

fn logic(plan: &ProjectPlan) -> Vec<GeneratedFile> {
    let dir = plan.source_dir();
    plan.screens
        .iter()
        .map(|screen| {
            let layout = layout_name(screen);
            if plan.is_kotlin() {
                let source = format!(
                    r#"package {pkg}

import android.os.Bundle
import androidx.appcompat.app.AppCompatActivity

class {screen} : AppCompatActivity() {{
    override fun onCreate(savedInstanceState: Bundle?) {{
        super.onCreate(savedInstanceState)
        setContentView(R.layout.{layout})
    }}
}}
"#,
                    pkg = plan.package_name,
                );
                GeneratedFile::new(dir.join(format!("{}.kt", screen)), source)
            } else {
                let source = format!(
                    r#"package {pkg};

import android.os.Bundle;
import androidx.appcompat.app.AppCompatActivity;

public class {screen} extends AppCompatActivity {{
    @Override
    protected void onCreate(Bundle savedInstanceState) {{
        super.onCreate(savedInstanceState);
        setContentView(R.layout.{layout});
    }}
}}
"#,
                    pkg = plan.package_name,
                );
                GeneratedFile::new(dir.join(format!("{}.java", screen)), source)
            }
        })
        .collect()
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- none\n".to_string();
    }
    items.iter().map(|i| format!("- {}\n", i)).collect()
}

fn features(plan: &ProjectPlan) -> Vec<GeneratedFile> {
    let readme = format!(
        "# {name}\n\n{description}\n\n\
         Package: `{pkg}`  \nLanguage: {language}  \nTheme: {theme}\n\n\
         ## Features\n\n{features}\n\
         ## Screens\n\n{screens}\n\
         ## Permissions\n\n{permissions}\n\
         ## Building\n\n```sh\n./gradlew assembleDebug\n```\n",
        name = plan.app_name,
        description = plan.description,
        pkg = plan.package_name,
        language = plan.language,
        theme = plan.theme,
        features = bullet_list(&plan.features),
        screens = bullet_list(&plan.screens),
        permissions = bullet_list(&plan.permissions),
    );

    let notes = format!(
        "# Feature notes\n\nCategory: {category}\n\n## Planned features\n\n{features}\n\
         ## Suggested libraries\n\n{dependencies}",
        category = plan.category,
        features = bullet_list(&plan.features),
        dependencies = bullet_list(&plan.dependencies),
    );

    vec![
        GeneratedFile::new("README.md", readme),
        GeneratedFile::new("FEATURES.md", notes),
    ]
}
